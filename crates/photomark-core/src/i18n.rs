//! Localized user-facing messages.
//!
//! The task scheduler is the single place that turns a typed error into a
//! user-facing string; everything else works with message keys.

/// Supported response languages. Unknown codes fall back to Chinese, the
/// original deployment's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    En,
    Zh,
}

impl Language {
    pub fn parse(code: &str) -> Self {
        match code.to_ascii_lowercase().as_str() {
            "en" => Language::En,
            _ => Language::Zh,
        }
    }
}

const MESSAGES: &[(&str, &str, &str)] = &[
    (
        "unsupported_manufacturer",
        "Unsupported camera! Please wait for our update.",
        "暂不支持该品牌相机！请等待我们的更新。",
    ),
    (
        "no_exif_data",
        "This image does not contain valid exif data!",
        "该图片不包含有效的exif数据！",
    ),
    (
        "exif_read_error",
        "Failed to parse EXIF information from the image.",
        "无法从图片中解析 EXIF 信息。",
    ),
    (
        "image_too_large",
        "Image size exceeds 100 million pixels, too large to process!",
        "图片超过一亿像素，尺寸过大，无法处理！",
    ),
    (
        "unexpected_error",
        "An unexpected error occurred while processing the watermark.",
        "处理水印时发生未知错误。",
    ),
];

/// Look up a localized message by key. Returns `None` for unknown keys so
/// callers can substitute the generic message themselves.
pub fn lookup(key: &str, lang: Language) -> Option<&'static str> {
    MESSAGES
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|(_, en, zh)| match lang {
            Language::En => *en,
            Language::Zh => *zh,
        })
}

/// Localized message for a key, falling back to the generic unexpected-error
/// message when the key is unknown.
pub fn message_or_generic(key: &str, lang: Language) -> &'static str {
    lookup(key, lang)
        .or_else(|| lookup("unexpected_error", lang))
        .unwrap_or("An unexpected error occurred while processing the watermark.")
}
