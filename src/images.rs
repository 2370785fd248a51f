use crate::pgarray::parse_text_array;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Keys inside a scraped payload that have been seen carrying image URLs.
const PAYLOAD_IMAGE_KEYS: &[&str] = &[
    "images",
    "image_urls",
    "all_images",
    "main_image",
    "image",
    "thumbnail",
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedImages {
    pub images: Vec<String>,
    pub primary: Option<String>,
    pub placeholder: bool,
}

/// Image candidates for one record, highest priority first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCandidates<'a> {
    pub active: Option<&'a str>,
    pub stored: &'a [String],
    pub payload: Option<&'a Value>,
}

pub fn normalize_image_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if let Some(rest) = trimmed.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        trimmed.to_string()
    };
    let parsed = reqwest::Url::parse(&candidate).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str().filter(|host| !host.is_empty())?;
    Some(candidate)
}

pub fn resolve_images(
    candidates: ImageCandidates<'_>,
    max: usize,
    placeholder: Option<&str>,
) -> ResolvedImages {
    let mut raw: Vec<String> = Vec::new();
    if let Some(active) = candidates.active {
        raw.push(active.to_string());
    }
    raw.extend(candidates.stored.iter().cloned());
    if let Some(payload) = candidates.payload {
        collect_payload_images(payload, &mut raw);
    }

    let mut seen = HashSet::new();
    let images: Vec<String> = raw
        .iter()
        .filter_map(|value| normalize_image_url(value))
        .filter(|url| seen.insert(url.clone()))
        .take(max.max(1))
        .collect();

    if images.is_empty() {
        let fallback = placeholder.and_then(normalize_image_url);
        return ResolvedImages {
            primary: fallback.clone(),
            placeholder: fallback.is_some(),
            images: fallback.into_iter().collect(),
        };
    }

    ResolvedImages {
        primary: images.first().cloned(),
        images,
        placeholder: false,
    }
}

fn collect_payload_images(payload: &Value, out: &mut Vec<String>) {
    let Some(obj) = payload.as_object() else {
        if let Some(text) = payload.as_str() {
            // Some rows store the whole payload as an encoded JSON string.
            if let Ok(inner) = serde_json::from_str::<Value>(text)
                && inner.is_object()
            {
                collect_payload_images(&inner, out);
            }
        }
        return;
    };
    for key in PAYLOAD_IMAGE_KEYS {
        if let Some(value) = obj.get(*key) {
            collect_image_value(value, out);
        }
    }
}

fn collect_image_value(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => out.extend(parse_text_array(text)),
        Value::Array(items) => {
            for item in items {
                collect_image_value(item, out);
            }
        }
        Value::Object(obj) => {
            if let Some(url) = obj
                .get("url")
                .or_else(|| obj.get("src"))
                .and_then(Value::as_str)
            {
                out.push(url.to_string());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_protocol_relative_and_quoted_urls() {
        assert_eq!(
            normalize_image_url("//auctions.c.yimg.jp/a.jpg").as_deref(),
            Some("https://auctions.c.yimg.jp/a.jpg")
        );
        assert_eq!(
            normalize_image_url(" \"https://a.jp/x.jpg\" ").as_deref(),
            Some("https://a.jp/x.jpg")
        );
    }

    #[test]
    fn rejects_non_http_values() {
        assert!(normalize_image_url("data:image/png;base64,AAAA").is_none());
        assert!(normalize_image_url("/img/local.jpg").is_none());
        assert!(normalize_image_url("ftp://a.jp/x.jpg").is_none());
        assert!(normalize_image_url("   ").is_none());
    }

    #[test]
    fn active_image_wins_and_duplicates_collapse() {
        let stored = vec![
            "https://a.jp/1.jpg".to_string(),
            "https://a.jp/2.jpg".to_string(),
        ];
        let resolved = resolve_images(
            ImageCandidates {
                active: Some("https://a.jp/2.jpg"),
                stored: &stored,
                payload: None,
            },
            10,
            None,
        );
        assert_eq!(
            resolved.images,
            vec!["https://a.jp/2.jpg", "https://a.jp/1.jpg"]
        );
        assert_eq!(resolved.primary.as_deref(), Some("https://a.jp/2.jpg"));
        assert!(!resolved.placeholder);
    }

    #[test]
    fn falls_back_to_payload_fields() {
        let payload = json!({
            "images": "{//a.jp/1.jpg,https://a.jp/2.jpg}",
            "main_image": {"src": "https://a.jp/main.jpg"},
            "thumbnail": ["https://a.jp/2.jpg"],
        });
        let resolved = resolve_images(
            ImageCandidates {
                active: None,
                stored: &[],
                payload: Some(&payload),
            },
            10,
            None,
        );
        assert_eq!(
            resolved.images,
            vec![
                "https://a.jp/1.jpg",
                "https://a.jp/2.jpg",
                "https://a.jp/main.jpg"
            ]
        );
    }

    #[test]
    fn reads_payload_encoded_as_string() {
        let payload = Value::String(r#"{"image":"https://a.jp/s.jpg"}"#.into());
        let resolved = resolve_images(
            ImageCandidates {
                active: None,
                stored: &[],
                payload: Some(&payload),
            },
            10,
            None,
        );
        assert_eq!(resolved.primary.as_deref(), Some("https://a.jp/s.jpg"));
    }

    #[test]
    fn caps_at_max() {
        let stored: Vec<String> = (0..5).map(|i| format!("https://a.jp/{i}.jpg")).collect();
        let resolved = resolve_images(
            ImageCandidates {
                stored: &stored,
                ..Default::default()
            },
            3,
            None,
        );
        assert_eq!(resolved.images.len(), 3);
    }

    #[test]
    fn placeholder_only_when_nothing_usable() {
        let stored = vec!["not a url".to_string()];
        let candidates = ImageCandidates {
            stored: &stored,
            ..Default::default()
        };
        let resolved = resolve_images(candidates, 5, Some("https://cdn.example.com/noimage.png"));
        assert!(resolved.placeholder);
        assert_eq!(resolved.images.len(), 1);

        let empty = resolve_images(candidates, 5, None);
        assert!(empty.images.is_empty());
        assert!(empty.primary.is_none());
        assert!(!empty.placeholder);
    }
}
