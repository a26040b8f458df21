use omero_transfer_core::xml::{is_well_formed_element, value_content, value_element};

const VALUES: [&str; 9] = [
    r#"{"foo":1,"bar:"this>other"}"#,
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100"><circle cx="50" cy="50" r="40" stroke="green" stroke-width="4" fill="yellow" /></svg>"#,
    "Free text with <b>an unbalanced</i> tag pair & an ampersand",
    r#"<CustomMetadata><Entry key="objective">60x</Entry><Entry key="medium">oil</Entry><Empty/></CustomMetadata>"#,
    "plain text",
    r#"<svg xmlns="http://www.w3.org/2000/svg"><g><rect x="416.066" y="226.858"/></g></svg>"#,
    "   \n  mixed<b> \n content\n  </b> after ",
    "hello <mis> </matched> world\n \n",
    "<ChannelThresholds>
          <RoiName>011</RoiName>
          <Bluethreshold>-1</Bluethreshold>
          <Greenthreshold>-1</Greenthreshold>
          <Yellowthreshold>-1</Yellowthreshold>
          <Redthreshold>-1</Redthreshold>
        </ChannelThresholds>",
];

#[test]
fn value_content_round_trips() {
    for value in VALUES {
        let element = value_element(value);
        assert_eq!(value_content(&element).unwrap(), value, "via {element}");
    }
}

#[test]
fn only_single_elements_embed_as_markup() {
    assert!(!is_well_formed_element(VALUES[0]));
    assert!(is_well_formed_element(VALUES[1]));
    assert!(!is_well_formed_element(VALUES[2]));
    assert!(is_well_formed_element(VALUES[3]));
    assert!(value_element(VALUES[3]).contains("<Entry key"));
    assert!(!is_well_formed_element(VALUES[6]));
    assert!(is_well_formed_element(VALUES[8]));
}

#[test]
fn nested_markup_keeps_escaped_text() {
    let value = "<note>a &amp; b</note>";
    assert_eq!(value_content(&value_element(value)).unwrap(), value);
}
