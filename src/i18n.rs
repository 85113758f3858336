//! Message catalogs and per-request language selection.
//!
//! Message keys are the English source strings; `{}` marks a positional
//! argument. Catalogs are loaded once into a [`Translator`] at startup and
//! every request derives its own [`Localizer`] from it.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

/// Profile/session value meaning "use the browser's language".
pub const BROWSER_LANGUAGE: &str = "browser";

const DUTCH_CATALOG: &str = include_str!("../locales/nl.json");
const GERMAN_CATALOG: &str = include_str!("../locales/de.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    English,
    Dutch,
    German,
}

impl Language {
    pub fn all() -> &'static [Language] {
        &[Language::English, Language::Dutch, Language::German]
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Dutch => "nl",
            Language::German => "de",
        }
    }

    pub fn native_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Dutch => "Nederlands",
            Language::German => "Deutsch",
        }
    }

    /// Matches on the primary subtag only, so `nl-BE` selects Dutch.
    pub fn from_tag(tag: &str) -> Option<Language> {
        let primary = tag.trim().split(['-', '_']).next()?.to_ascii_lowercase();
        Language::all().iter().copied().find(|l| l.code() == primary)
    }
}

/// Splits an `Accept-Language` value into tags ordered by quality.
/// Tags with `q=0` or an unparsable weight are dropped.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut tags: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }

            let mut quality = 1.0;
            for param in pieces {
                if let Some(q) = param.trim().strip_prefix("q=") {
                    quality = q.trim().parse().ok()?;
                }
            }
            (quality > 0.0).then(|| (tag.to_string(), quality))
        })
        .collect();

    // stable: equal weights keep header order
    tags.sort_by(|a, b| b.1.total_cmp(&a.1));
    tags.into_iter().map(|(tag, _)| tag).collect()
}

pub struct Translator {
    catalogs: HashMap<Language, Arc<HashMap<String, String>>>,
}

impl Translator {
    pub fn load() -> Result<Self> {
        let mut catalogs = HashMap::new();
        catalogs.insert(Language::English, Arc::new(HashMap::new()));
        catalogs.insert(
            Language::Dutch,
            Arc::new(serde_json::from_str(DUTCH_CATALOG).context("parsing nl catalog")?),
        );
        catalogs.insert(
            Language::German,
            Arc::new(serde_json::from_str(GERMAN_CATALOG).context("parsing de catalog")?),
        );

        Ok(Translator { catalogs })
    }

    /// Picks the first supported language among the candidates, in order.
    /// Each candidate may be a single tag or a full `Accept-Language` value;
    /// empty candidates and the browser sentinel are skipped.
    pub fn localizer(&self, candidates: &[Option<&str>]) -> Localizer {
        let language = candidates
            .iter()
            .flatten()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty() && *c != BROWSER_LANGUAGE)
            .flat_map(parse_accept_language)
            .find_map(|tag| Language::from_tag(&tag))
            .unwrap_or(Language::English);

        self.for_language(language)
    }

    pub fn for_language(&self, language: Language) -> Localizer {
        Localizer {
            language,
            catalog: self.catalogs.get(&language).cloned().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Localizer {
    language: Language,
    catalog: Arc<HashMap<String, String>>,
}

impl Localizer {
    pub fn language(&self) -> Language {
        self.language
    }

    pub fn get(&self, key: &str) -> String {
        self.catalog
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Translates `key` and fills its `{}` placeholders in order. Surplus
    /// placeholders are left as-is; surplus arguments are dropped.
    pub fn getf(&self, key: &str, args: &[&dyn Display]) -> String {
        let template = self.get(key);
        let mut out = String::with_capacity(template.len());
        let mut args = args.iter();
        let mut rest = template.as_str();

        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            match args.next() {
                Some(arg) => out.push_str(&arg.to_string()),
                None => out.push_str("{}"),
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_language_is_ordered_by_quality() {
        assert_eq!(
            parse_accept_language("fr;q=0.5, nl-BE, en;q=0.8, de;q=0"),
            vec!["nl-BE", "en", "fr"]
        );
        assert!(parse_accept_language("").is_empty());
        assert_eq!(parse_accept_language("de"), vec!["de"]);
    }

    #[test]
    fn first_supported_candidate_wins() {
        let t = Translator::load().expect("catalogs should load");

        let l = t.localizer(&[Some("nl"), Some("de"), Some("en-US")]);
        assert_eq!(l.language(), Language::Dutch);

        let l = t.localizer(&[None, Some(BROWSER_LANGUAGE), Some("fr-FR,de;q=0.7")]);
        assert_eq!(l.language(), Language::German);

        let l = t.localizer(&[Some(""), Some("fr")]);
        assert_eq!(l.language(), Language::English);
    }

    #[test]
    fn getf_fills_placeholders() {
        let t = Translator::load().expect("catalogs should load");
        let en = t.for_language(Language::English);

        assert_eq!(
            en.getf("Added {} new workout(s): {}", &[&2, &"a; b"]),
            "Added 2 new workout(s): a; b"
        );
        assert_eq!(en.getf("{} and {}", &[&1]), "1 and {}");
    }

    #[test]
    fn dutch_catalog_translates() {
        let t = Translator::load().expect("catalogs should load");
        let nl = t.for_language(Language::Dutch);

        assert_eq!(nl.get("Workouts"), "Trainingen");
        assert_eq!(nl.get("not in any catalog"), "not in any catalog");
    }

    #[test]
    fn every_catalog_key_keeps_its_placeholders() {
        let t = Translator::load().expect("catalogs should load");
        for lang in [Language::Dutch, Language::German] {
            let l = t.for_language(lang);
            for (key, value) in l.catalog.iter() {
                assert_eq!(
                    key.matches("{}").count(),
                    value.matches("{}").count(),
                    "{} catalog entry {:?}",
                    lang.code(),
                    key
                );
            }
        }
    }
}
