use super::*;
use pretty_assertions::assert_eq;

#[test]
fn config_defaults_are_sane() {
    let cfg = Config::default();
    assert!(cfg.recycle_pages);
    assert_eq!(cfg.watermark, WatermarkPolicy::PerWrite);
}

#[test]
fn builder_defaults_match_default_impl() {
    assert_eq!(Config::builder().build(), Config::default());

    let manual = Config::builder()
        .recycle_pages(false)
        .watermark(WatermarkPolicy::Manual)
        .build();
    assert!(!manual.recycle_pages);
    assert_eq!(manual.watermark, WatermarkPolicy::Manual);
}

#[test]
fn db_error_formats_cleanly() {
    let err = DbError::Corruption("offset table overruns buffer".into());
    assert!(format!("{err}").contains("corruption"));
    assert!(err.is_fatal());

    let err = DbError::SizeLimit {
        key_len: 1001,
        value_len: 0,
    };
    assert!(format!("{err}").contains("exceeds max size"));
    assert!(!err.is_fatal());
}

#[test]
fn io_error_converts() {
    let e = io::Error::other("oops");
    let db_err: DbError = e.into();
    assert!(matches!(db_err, DbError::Io(_)));
}

#[test]
fn page_id_none_marker() {
    assert!(PageId::NONE.is_none());
    assert!(!PageId(7).is_none());
    assert_eq!(PageId(7).to_string(), "#7");
}
