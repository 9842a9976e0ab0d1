use proptest::prelude::*;
use vaultbase_attachments::reference::{format_refs, parse_refs, AttachmentRef, FALLBACK_NAME};

fn display_name() -> impl Strategy<Value = String> {
    // Any printable name, delimiters and blank names included; construction sanitizes them.
    "[a-zA-Z0-9 ._|;-]{0,24}"
}

fn blob_name() -> impl Strategy<Value = String> {
    "[0-9a-f]{32}".prop_map(|hex| format!("{hex}.enc"))
}

fn refs(max: usize) -> impl Strategy<Value = Vec<AttachmentRef>> {
    proptest::collection::vec(
        (display_name(), blob_name()).prop_map(|(name, blob)| AttachmentRef::new(name, blob)),
        0..=max,
    )
}

proptest! {
    #[test]
    fn parse_inverts_format(list in refs(3)) {
        prop_assert_eq!(parse_refs(&format_refs(&list)), list);
    }

    #[test]
    fn legacy_values_parse_to_themselves(value in "[a-zA-Z0-9 ._-]{1,32}".prop_filter("not blank", |s| !s.trim().is_empty())) {
        prop_assert_eq!(parse_refs(&value), vec![AttachmentRef::legacy(&value)]);
    }
}

#[test]
fn fixed_sizes_zero_one_three() {
    let one = vec![AttachmentRef::new("a.pdf", "1.enc")];
    let three = vec![
        AttachmentRef::new("a.pdf", "1.enc"),
        AttachmentRef::new("b c.png", "2.enc"),
        AttachmentRef::new("d", "3.enc"),
    ];
    assert_eq!(parse_refs(&format_refs(&[])), Vec::<AttachmentRef>::new());
    assert_eq!(parse_refs(&format_refs(&one)), one);
    assert_eq!(parse_refs(&format_refs(&three)), three);
    assert_eq!(format_refs(&three), "a.pdf|1.enc;;b c.png|2.enc;;d|3.enc");
}

#[test]
fn blank_display_names_keep_their_pair() {
    let list = vec![
        AttachmentRef::new("", "abc.enc"),
        AttachmentRef::new("   ", "def.enc"),
        AttachmentRef::new("b.pdf", "d.enc"),
    ];
    assert_eq!(list[0].original_name, FALLBACK_NAME);
    assert_eq!(list[1].original_name, FALLBACK_NAME);
    assert_eq!(parse_refs(&format_refs(&list)), list);
}
