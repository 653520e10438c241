use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// 商品描述中的常见无意义词
pub const STOP_WORDS: &[&str] = &[
    "for", "a", "of", "the", "and", "to", "in", "view", "more", "product", "infromation", "an",
    "w", "very", "by", "has", "ikea", "get", "with", "as", "information", "you", "it", "on",
    "thats", "have", "price", "reflects", "selected", "options", "guarantee", "brochure", "year",
    "read", "about", "terms",
];

const PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

static STOP_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOP_WORDS.iter().copied().collect());

/// 连续的标点及其两侧空格
static PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(" *[{}]+ *", regex::escape(PUNCTUATION))).expect("failed to build regex")
});

/// 小写、去除停用词，并把标点替换为单个空格
pub fn preprocess(text: &str) -> String {
    let text = text.to_lowercase();
    let words = text
        .split_whitespace()
        .filter(|w| !STOP_SET.contains(w))
        .collect::<Vec<_>>()
        .join(" ");
    PUNCT_RE.replace_all(&words, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess() {
        assert_eq!(preprocess("The RED Chair for you"), "red chair");
        assert_eq!(preprocess("oak/walnut , veneer!"), "oak walnut veneer ");
        assert_eq!(preprocess("  "), "");
        // 停用词在去除标点之前判断
        assert_eq!(preprocess("ikea, sofa"), "ikea sofa");
    }
}
