//! Platform-version comparison.
//!
//! Platform images are named by ISO timestamps (`20210112T084020Z`), so
//! ordering them is a lexicographic string compare once both sides have
//! passed format validation.

use nodegrid_core::PlatformMap;

/// Check a server's booted platform against a `min_platform` map. Every
/// entry must be satisfied.
pub fn meets_min_platforms(live_image: Option<&str>, required: &PlatformMap) -> Result<(), String> {
    if required.is_empty() {
        return Ok(());
    }
    let Some(live) = live_image else {
        return Err("server reports no Live Image platform".to_string());
    };

    for (version, stamp) in required {
        if live < stamp.as_str() {
            return Err(format!(
                "platform {live} is older than the {stamp} required for {version}"
            ));
        }
    }
    Ok(())
}

/// Check a server's booted platform against a `max_platform` map.
pub fn meets_max_platforms(live_image: Option<&str>, required: &PlatformMap) -> Result<(), String> {
    if required.is_empty() {
        return Ok(());
    }
    let Some(live) = live_image else {
        return Err("server reports no Live Image platform".to_string());
    };

    for (version, stamp) in required {
        if live > stamp.as_str() {
            return Err(format!(
                "platform {live} is newer than the {stamp} allowed for {version}"
            ));
        }
    }
    Ok(())
}

/// Check a single required minimum stamp, used by the feature-gated
/// platform filters.
pub fn meets_min_stamp(live_image: Option<&str>, stamp: &str) -> Result<(), String> {
    let Some(live) = live_image else {
        return Err("server reports no Live Image platform".to_string());
    };
    if live < stamp {
        return Err(format!("platform {live} is older than the required {stamp}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn min_platform_lexicographic() {
        let required = HashMap::from([("7.0".to_string(), "20200101T000000Z".to_string())]);

        assert!(meets_min_platforms(Some("20210112T084020Z"), &required).is_ok());
        assert!(meets_min_platforms(Some("20200101T000000Z"), &required).is_ok());
        assert!(meets_min_platforms(Some("20191231T235959Z"), &required).is_err());
    }

    #[test]
    fn max_platform_lexicographic() {
        let required = HashMap::from([("7.0".to_string(), "20200101T000000Z".to_string())]);

        assert!(meets_max_platforms(Some("20191231T235959Z"), &required).is_ok());
        assert!(meets_max_platforms(Some("20200101T000000Z"), &required).is_ok());
        assert!(meets_max_platforms(Some("20210112T084020Z"), &required).is_err());
    }

    #[test]
    fn every_map_entry_must_pass() {
        let required = HashMap::from([
            ("7.0".to_string(), "20200101T000000Z".to_string()),
            ("7.1".to_string(), "20210101T000000Z".to_string()),
        ]);

        assert!(meets_min_platforms(Some("20201231T000000Z"), &required).is_err());
        assert!(meets_min_platforms(Some("20210102T000000Z"), &required).is_ok());
    }

    #[test]
    fn missing_live_image_fails_when_constrained() {
        let required = HashMap::from([("7.0".to_string(), "20200101T000000Z".to_string())]);
        assert!(meets_min_platforms(None, &required).is_err());
        assert!(meets_min_platforms(None, &HashMap::new()).is_ok());
    }
}
