//! Fixed lookup tables for taxonomy assignment: the industry→category
//! keyword table and the 47 Japanese prefectures.

use once_cell::sync::Lazy;

pub const TAXONOMY_CATEGORY: &str = "category";
pub const TAXONOMY_PREFECTURE: &str = "prefecture";
pub const TAXONOMY_TAG: &str = "tag";

/// Exact-string industry keywords mapped to category slugs. Industries not
/// in this table are dropped; there is no catch-all bucket.
static INDUSTRY_CATEGORIES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("情報通信業", "it-digital"),
        ("IT", "it-digital"),
        ("デジタル", "it-digital"),
        ("製造業", "manufacturing"),
        ("サービス業", "service"),
        ("農業", "agriculture"),
        ("観光業", "tourism"),
        ("医療", "healthcare"),
        ("介護", "healthcare"),
        ("教育", "education"),
        ("環境", "environment"),
        ("エネルギー", "environment"),
        ("スタートアップ", "startup"),
        ("研究開発", "research"),
    ]
});

static PREFECTURES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "北海道", "青森県", "岩手県", "宮城県", "秋田県", "山形県", "福島県",
        "茨城県", "栃木県", "群馬県", "埼玉県", "千葉県", "東京都", "神奈川県",
        "新潟県", "富山県", "石川県", "福井県", "山梨県", "長野県", "岐阜県",
        "静岡県", "愛知県", "三重県", "滋賀県", "京都府", "大阪府", "兵庫県",
        "奈良県", "和歌山県", "鳥取県", "島根県", "岡山県", "広島県", "山口県",
        "徳島県", "香川県", "愛媛県", "高知県", "福岡県", "佐賀県", "長崎県",
        "熊本県", "大分県", "宮崎県", "鹿児島県", "沖縄県",
    ]
});

pub fn industry_category(industry: &str) -> Option<&'static str> {
    INDUSTRY_CATEGORIES
        .iter()
        .find(|(keyword, _)| *keyword == industry)
        .map(|(_, slug)| *slug)
}

/// Category slugs for a subsidy's industry list, deduplicated in first-seen
/// order. Unmapped industries are silently dropped.
pub fn categories_for_industries(industries: &[String]) -> Vec<String> {
    let mut slugs: Vec<String> = Vec::new();
    for industry in industries {
        if let Some(slug) = industry_category(industry) {
            if !slugs.iter().any(|s| s == slug) {
                slugs.push(slug.to_string());
            }
        }
    }
    slugs
}

/// Extract the first prefecture name contained in a free-text area string.
pub fn extract_prefecture(area: &str) -> Option<&'static str> {
    PREFECTURES.iter().find(|p| area.contains(*p)).copied()
}

/// Prefecture terms for a subsidy's target areas, deduplicated; areas with
/// no recognizable prefecture are dropped.
pub fn prefectures_for_areas(areas: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for area in areas {
        if let Some(name) = extract_prefecture(area) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}
