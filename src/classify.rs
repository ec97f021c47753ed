use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{Classification, KosherCategory};
use crate::normalize::fold;

const BUILTIN_ALLOW_LISTS: &str = include_str!("../data/allow_lists.json");

const CATEGORY_KEYWORDS: &[(KosherCategory, &[&str])] = &[
    (
        KosherCategory::Meat,
        &["meat", "fleish", "fleisch", "poultry", "bbq", "grill", "steakhouse"],
    ),
    (KosherCategory::Dairy, &["dairy", "chalav", "cholov", "milchig"]),
    (KosherCategory::Pareve, &["pareve", "parve", "nondairy"]),
    (KosherCategory::Fish, &["fish", "sushi", "seafood"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("listing has no name")]
    MissingName,
}

#[derive(Deserialize)]
struct AllowListFile {
    version: u32,
    #[serde(default)]
    chalav_stam: Vec<String>,
    #[serde(default)]
    pas_yisroel: Vec<String>,
}

/// Restaurant names with a supervision status that differs from the default
/// for their category. Names are compared folded.
#[derive(Debug, Clone)]
pub struct AllowLists {
    version: u32,
    chalav_stam: HashSet<String>,
    pas_yisroel: HashSet<String>,
}

impl AllowLists {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_ALLOW_LISTS).context("Built-in allow lists are malformed")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read allow lists {:?}", path))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse allow lists {:?}", path))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: AllowListFile = serde_json::from_str(json)?;
        let fold_all = |names: Vec<String>| -> HashSet<String> {
            names.iter().map(|n| fold(n)).filter(|n| !n.is_empty()).collect()
        };
        Ok(AllowLists {
            version: file.version,
            chalav_stam: fold_all(file.chalav_stam),
            pas_yisroel: fold_all(file.pas_yisroel),
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_chalav_stam(&self, name: &str) -> bool {
        self.chalav_stam.contains(&fold(name))
    }

    pub fn is_pas_yisroel(&self, name: &str) -> bool {
        self.pas_yisroel.contains(&fold(name))
    }

    pub fn sizes(&self) -> (usize, usize) {
        (self.chalav_stam.len(), self.pas_yisroel.len())
    }
}

/// Map upstream category text ("Restaurants » Dairy") to a category. The last
/// breadcrumb segment wins; the whole text is the fallback.
pub fn category_from_text(text: &str) -> KosherCategory {
    let last = text
        .split(['»', '›', '>'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .last();
    last.and_then(match_keywords)
        .or_else(|| match_keywords(text))
        .unwrap_or(KosherCategory::Unknown)
}

/// "non dairy", "no meat", "dairy free": the word names what the place is not.
fn is_negated(words: &[&str], i: usize) -> bool {
    (i > 0 && matches!(words[i - 1], "non" | "no")) || words.get(i + 1) == Some(&"free")
}

fn match_keywords(text: &str) -> Option<KosherCategory> {
    let folded = fold(text);
    let words: Vec<&str> = folded.split_whitespace().collect();
    let hits = |i: usize, keywords: &[&str]| keywords.iter().any(|kw| words[i].starts_with(kw));

    let found = CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| (0..words.len()).any(|i| !is_negated(&words, i) && hits(i, *keywords)))
        .map(|(category, _)| *category);

    // only negated meat or dairy terms left: neither, so pareve
    found.or_else(|| {
        let negated_meat_or_dairy = (0..words.len()).any(|i| {
            is_negated(&words, i)
                && CATEGORY_KEYWORDS
                    .iter()
                    .filter(|(c, _)| matches!(c, KosherCategory::Meat | KosherCategory::Dairy))
                    .any(|(_, keywords)| hits(i, *keywords))
        });
        negated_meat_or_dairy.then_some(KosherCategory::Pareve)
    })
}

pub fn classify(
    category_text: Option<&str>,
    name: &str,
    lists: &AllowLists,
) -> Result<Classification, ClassifyError> {
    if name.trim().is_empty() {
        return Err(ClassifyError::MissingName);
    }

    let kosher_category = category_text
        .map(category_from_text)
        .unwrap_or(KosherCategory::Unknown);

    let is_cholov_yisroel = match kosher_category {
        KosherCategory::Dairy => Some(!lists.is_chalav_stam(name)),
        _ => None,
    };

    Ok(Classification {
        kosher_category,
        is_cholov_yisroel,
        is_pas_yisroel: lists.is_pas_yisroel(name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lists() -> AllowLists {
        AllowLists::builtin().unwrap()
    }

    #[test]
    fn builtin_lists_load() {
        let l = lists();
        assert!(l.version() >= 1);
        let (stam, pas) = l.sizes();
        assert!(stam > 0 && pas > 0);
    }

    #[test]
    fn hollywood_deli_is_chalav_stam_dairy() {
        let c = classify(Some("Restaurants » Dairy"), "Hollywood Deli", &lists()).unwrap();
        assert_eq!(c.kosher_category, KosherCategory::Dairy);
        assert_eq!(c.is_cholov_yisroel, Some(false));
    }

    #[test]
    fn fleisch_41_is_meat_without_cholov_flag() {
        let c = classify(Some("Restaurants » Meat"), "Fleisch 41", &lists()).unwrap();
        assert_eq!(c.kosher_category, KosherCategory::Meat);
        assert_ne!(c.is_cholov_yisroel, Some(true));
        assert!(!c.is_pas_yisroel);
    }

    #[test]
    fn dairy_defaults_to_cholov_yisroel() {
        for name in ["Cafe Noir", "Milk & Honey", "Pizza Plus"] {
            let c = classify(Some("Restaurants » Dairy"), name, &lists()).unwrap();
            assert_eq!(c.is_cholov_yisroel, Some(true), "{}", name);
        }
    }

    #[test]
    fn non_dairy_never_cholov_yisroel() {
        for cat in ["Restaurants » Meat", "Restaurants » Pareve", "Sushi", "Bakeries"] {
            let c = classify(Some(cat), "Hollywood Deli", &lists()).unwrap();
            assert_eq!(c.is_cholov_yisroel, None, "{}", cat);
        }
    }

    #[test]
    fn pas_yisroel_only_for_listed_names() {
        let l = lists();
        let c = classify(Some("Restaurants » Meat"), "Grill Time", &l).unwrap();
        assert!(c.is_pas_yisroel);
        let c = classify(Some("Restaurants » Meat"), "  grill   TIME ", &l).unwrap();
        assert!(c.is_pas_yisroel);
        let c = classify(Some("Restaurants » Meat"), "Grill Timer", &l).unwrap();
        assert!(!c.is_pas_yisroel);
    }

    #[test]
    fn category_text_variants() {
        assert_eq!(category_from_text("Restaurants » Dairy"), KosherCategory::Dairy);
        assert_eq!(category_from_text("Restaurants > Fleishig"), KosherCategory::Meat);
        assert_eq!(category_from_text("Parve Bakeries"), KosherCategory::Pareve);
        assert_eq!(category_from_text("Restaurants › Sushi Bars"), KosherCategory::Fish);
        assert_eq!(category_from_text("Meat » Catering"), KosherCategory::Meat);
        assert_eq!(category_from_text("Restaurants » Non-Dairy"), KosherCategory::Pareve);
        assert_eq!(category_from_text("Dairy-Free Bakeries"), KosherCategory::Pareve);
        assert_eq!(category_from_text("Nondairy Desserts"), KosherCategory::Pareve);
        assert_eq!(category_from_text("Pareve (Non-Dairy)"), KosherCategory::Pareve);
        assert_eq!(category_from_text("Non-Dairy Sushi"), KosherCategory::Fish);
    }

    #[test]
    fn non_dairy_category_has_no_cholov_flag() {
        let c = classify(Some("Restaurants » Non-Dairy"), "Bagel Boss", &lists()).unwrap();
        assert_eq!(c.kosher_category, KosherCategory::Pareve);
        assert_eq!(c.is_cholov_yisroel, None);
    }

    #[test]
    fn unmapped_category_is_unknown() {
        assert_eq!(category_from_text("Bakeries"), KosherCategory::Unknown);
        assert_eq!(category_from_text(""), KosherCategory::Unknown);
        let c = classify(None, "Somewhere", &lists()).unwrap();
        assert_eq!(c.kosher_category, KosherCategory::Unknown);
        assert_eq!(c.is_cholov_yisroel, None);
    }

    #[test]
    fn empty_name_is_an_error() {
        assert_eq!(
            classify(Some("Restaurants » Dairy"), "  ", &lists()),
            Err(ClassifyError::MissingName)
        );
    }

    #[test]
    fn lists_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lists.json");
        std::fs::write(
            &path,
            r#"{"version": 7, "chalav_stam": ["Cafe Noir"], "pas_yisroel": []}"#,
        )
        .unwrap();
        let l = AllowLists::load(&path).unwrap();
        assert_eq!(l.version(), 7);
        assert!(l.is_chalav_stam("CAFE NOIR"));
        let c = classify(Some("Dairy"), "Cafe Noir", &l).unwrap();
        assert_eq!(c.is_cholov_yisroel, Some(false));
    }

    #[test]
    fn malformed_lists_rejected() {
        assert!(AllowLists::from_json(r#"{"chalav_stam": []}"#).is_err());
    }
}
