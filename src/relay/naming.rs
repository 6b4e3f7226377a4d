//! Stream naming conventions
//!
//! Backends register each camera as `{camera}_main` and `{camera}_sub`, but
//! older installs expose the primary stream under the bare camera name. When
//! the server rejects a name, the relay tries the other spelling of the
//! primary stream once.

/// Suffix of the primary (high resolution) stream
pub const MAIN_SUFFIX: &str = "_main";

/// Suffix of the secondary (low resolution) stream
pub const SUB_SUFFIX: &str = "_sub";

/// Alternate name to try after a "stream not found" error.
///
/// `cam_main` becomes `cam`, `cam` becomes `cam_main`. Secondary streams
/// have no alternate.
pub fn fallback_stream_name(stream_name: &str) -> Option<String> {
    if let Some(base) = stream_name.strip_suffix(MAIN_SUFFIX) {
        return (!base.is_empty()).then(|| base.to_string());
    }
    if stream_name.ends_with(SUB_SUFFIX) || stream_name.is_empty() {
        return None;
    }
    Some(format!("{stream_name}{MAIN_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_strips_suffix() {
        assert_eq!(fallback_stream_name("cam1_main"), Some("cam1".into()));
    }

    #[test]
    fn test_bare_appends_main() {
        assert_eq!(fallback_stream_name("cam1"), Some("cam1_main".into()));
    }

    #[test]
    fn test_sub_has_no_fallback() {
        assert_eq!(fallback_stream_name("cam1_sub"), None);
    }

    #[test]
    fn test_degenerate_names() {
        assert_eq!(fallback_stream_name(""), None);
        assert_eq!(fallback_stream_name("_main"), None);
    }

    #[test]
    fn test_round_trip_terminates() {
        // main -> bare -> main again; the relay stops at the repeat
        let first = fallback_stream_name("lobby_main").unwrap();
        let second = fallback_stream_name(&first).unwrap();
        assert_eq!(second, "lobby_main");
    }
}
