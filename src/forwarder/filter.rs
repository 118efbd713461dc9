//! Per-event relay filtering: keyword match and media-type classification.

use crate::forwarder::model::{MediaType, Rule};
use crate::platform::MessageMedia;

/// Outcome of running a message through a rule's filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Relay the message. `media_type` is set only when the media filter classified it.
    Relay { media_type: Option<MediaType> },
    /// No keyword matched.
    NoKeywordMatch,
    /// Media was classified into a type the rule does not allow.
    MediaTypeExcluded(MediaType),
}

/// Case-insensitive substring match. An empty keyword list matches everything.
pub fn matches_keywords(keywords: &[String], text: &str) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .any(|k| haystack.contains(&k.to_lowercase()))
}

/// Classify media by payload shape. Photo wins over document, document over video.
///
/// Returns `None` for shapes with no dedicated type (polls, locations, contacts).
pub fn classify_media(media: &MessageMedia) -> Option<MediaType> {
    if media.photo.is_some() {
        Some(MediaType::Photo)
    } else if media.document.is_some() {
        Some(MediaType::Document)
    } else if media.video.is_some() {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Apply the rule's keyword filter, then its media filter.
///
/// Unclassifiable media always passes the media filter.
pub fn evaluate(rule: &Rule, text: &str, media: Option<&MessageMedia>) -> FilterDecision {
    if !matches_keywords(&rule.keywords, text) {
        return FilterDecision::NoKeywordMatch;
    }

    let media_type = match media {
        Some(m) if rule.filter_media => classify_media(m),
        _ => None,
    };

    match media_type {
        Some(kind) if !rule.media_types.is_empty() && !rule.media_types.contains(&kind) => {
            return FilterDecision::MediaTypeExcluded(kind);
        }
        _ => {}
    }

    FilterDecision::Relay { media_type }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::model::NewRule;
    use crate::platform::FileRef;

    fn rule(keywords: &[&str], filter_media: bool, media_types: &[MediaType]) -> Rule {
        NewRule {
            user_id: "u".into(),
            source_chat_id: 1,
            source_chat_name: "s".into(),
            destination_chat_id: 2,
            destination_chat_name: "d".into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            filter_media,
            media_types: media_types.to_vec(),
            hide_source: true,
        }
        .into_rule()
    }

    fn file(id: &str) -> Option<FileRef> {
        Some(FileRef {
            id: id.into(),
            access_hash: None,
        })
    }

    #[test]
    fn keywords_case_insensitive() {
        let kws = vec!["SALE".to_string(), "promo".to_string()];
        assert!(matches_keywords(&kws, "Big sale today!"));
        assert!(matches_keywords(&kws, "PROMOTION"));
        assert!(!matches_keywords(&kws, "nothing here"));
        assert!(!matches_keywords(&kws, ""));
        assert!(matches_keywords(&[], ""));
    }

    #[test]
    fn classification_precedence() {
        let all = MessageMedia {
            photo: file("p"),
            document: file("d"),
            video: file("v"),
            other: None,
        };
        assert_eq!(classify_media(&all), Some(MediaType::Photo));

        let doc_and_video = MessageMedia {
            document: file("d"),
            video: file("v"),
            ..Default::default()
        };
        assert_eq!(classify_media(&doc_and_video), Some(MediaType::Document));

        let video = MessageMedia {
            video: file("v"),
            ..Default::default()
        };
        assert_eq!(classify_media(&video), Some(MediaType::Video));

        let poll = MessageMedia {
            other: Some(serde_json::json!({"poll": {"question": "?"}})),
            ..Default::default()
        };
        assert_eq!(classify_media(&poll), None);
    }

    #[test]
    fn video_excluded_when_only_photos_allowed() {
        let r = rule(&[], true, &[MediaType::Photo]);
        let video = MessageMedia {
            video: file("v"),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&r, "", Some(&video)),
            FilterDecision::MediaTypeExcluded(MediaType::Video)
        );
    }

    #[test]
    fn unclassifiable_media_passes() {
        let r = rule(&[], true, &[MediaType::Photo]);
        let poll = MessageMedia {
            other: Some(serde_json::json!({"geo": [0.0, 0.0]})),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&r, "", Some(&poll)),
            FilterDecision::Relay { media_type: None }
        );
    }

    #[test]
    fn media_not_classified_without_filter_flag() {
        let r = rule(&[], false, &[MediaType::Photo]);
        let video = MessageMedia {
            video: file("v"),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&r, "", Some(&video)),
            FilterDecision::Relay { media_type: None }
        );
    }

    #[test]
    fn empty_allowed_set_accepts_any_classified_media() {
        let r = rule(&[], true, &[]);
        let doc = MessageMedia {
            document: file("d"),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&r, "", Some(&doc)),
            FilterDecision::Relay {
                media_type: Some(MediaType::Document)
            }
        );
    }

    #[test]
    fn keyword_checked_before_media() {
        let r = rule(&["sale"], true, &[MediaType::Photo]);
        let video = MessageMedia {
            video: file("v"),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&r, "no match", Some(&video)),
            FilterDecision::NoKeywordMatch
        );
        assert!(matches!(evaluate(&r, "Big SALE", None), FilterDecision::Relay { .. }));
    }
}
