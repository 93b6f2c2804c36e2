use crate::content::inspector::Inspection;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Title fragments that pay-wall scammers keep reusing.
const TITLE_KEYWORDS: &[&str] = &[
    "patreon",
    "early access",
    "support me",
    "donate",
    "exclusive",
    "premium",
    "vip only",
];

/// Extensions that carry information but no game content.
const INFORMATIONAL_EXTENSIONS: &[&str] = &["txt", "html", "htm", "url", "lnk", "md", "pdf"];

/// Catalog-side metadata about a mod, as far as scoring cares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringMeta {
    pub title: String,
    pub download_count: u64,
    pub is_trending: bool,
    /// Count of community warnings recorded against this creator.
    pub creator_warned_count: u32,
}

/// Tunables for the rule table. The creator-ratio denominator is the
/// number of historical uploads the warned count is measured against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreParams {
    pub warn_threshold: u8,
    pub creator_ratio_threshold: f64,
    pub creator_ratio_denominator: u32,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            warn_threshold: 30,
            creator_ratio_threshold: 0.7,
            creator_ratio_denominator: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeScoreReport {
    pub score: u8,
    pub reasons: Vec<String>,
    pub suspicious: bool,
}

fn has_informational_only_contents(inspection: &Inspection) -> bool {
    inspection.file_list.iter().all(|name| {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| INFORMATIONAL_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    })
}

/// Scores an archive for fake-mod signals. Pure and deterministic: the
/// result depends only on the inputs, never on IO or clocks. Rules are
/// additive and the total is clamped at 100.
pub fn score(meta: &ScoringMeta, inspection: &Inspection, params: &ScoreParams) -> FakeScoreReport {
    let mut total: u32 = 0;
    let mut reasons = Vec::new();

    let title = meta.title.to_lowercase();
    if TITLE_KEYWORDS.iter().any(|kw| title.contains(kw)) {
        total += 25;
        reasons.push("suspicious title keywords".to_string());
    }

    if !inspection.has_package_files && !inspection.has_script_files {
        total += 50;
        reasons.push("no mod files detected".to_string());
    }

    if has_informational_only_contents(inspection) {
        total += 20;
        reasons.push("informational-only contents".to_string());
    }

    if meta.download_count < 100 && meta.is_trending {
        total += 15;
        reasons.push("low downloads but trending".to_string());
    }

    if params.creator_ratio_denominator > 0 {
        let ratio = f64::from(meta.creator_warned_count) / f64::from(params.creator_ratio_denominator);
        if ratio > params.creator_ratio_threshold {
            total += 10;
            reasons.push("creator has high warned ratio".to_string());
        }
    }

    let score = total.min(100) as u8;
    FakeScoreReport {
        score,
        suspicious: score >= params.warn_threshold,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspection(files: &[&str], packages: bool, scripts: bool) -> Inspection {
        Inspection {
            total_entries: files.len(),
            file_list: files.iter().map(|s| s.to_string()).collect(),
            has_package_files: packages,
            has_script_files: scripts,
            suspicious_files: false,
        }
    }

    #[test]
    fn paywall_readme_scores_high() {
        // "Patreon Exclusive Skin" shipping a lone readme.txt: 25 + 50 + 20.
        let meta = ScoringMeta {
            title: "Patreon Exclusive Skin".to_string(),
            download_count: 5000,
            is_trending: false,
            creator_warned_count: 0,
        };
        let report = score(
            &meta,
            &inspection(&["readme.txt"], false, false),
            &ScoreParams::default(),
        );
        assert_eq!(report.score, 95);
        assert!(report.suspicious);
        assert_eq!(
            report.reasons,
            vec![
                "suspicious title keywords",
                "no mod files detected",
                "informational-only contents"
            ]
        );
    }

    #[test]
    fn real_mod_scores_zero() {
        let meta = ScoringMeta {
            title: "Functional Bunk Beds".to_string(),
            download_count: 120_000,
            is_trending: true,
            creator_warned_count: 0,
        };
        let report = score(
            &meta,
            &inspection(&["Mods/beds.package"], true, false),
            &ScoreParams::default(),
        );
        assert_eq!(report.score, 0);
        assert!(!report.suspicious);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn empty_file_list_counts_as_informational() {
        let meta = ScoringMeta::default();
        let report = score(
            &meta,
            &inspection(&[], false, false),
            &ScoreParams::default(),
        );
        // no mod files (+50) and empty-therefore-informational (+20)
        assert_eq!(report.score, 70);
    }

    #[test]
    fn trending_with_few_downloads_adds_points() {
        let meta = ScoringMeta {
            title: "Cool Hair".to_string(),
            download_count: 12,
            is_trending: true,
            creator_warned_count: 0,
        };
        let report = score(
            &meta,
            &inspection(&["hair.package"], true, false),
            &ScoreParams::default(),
        );
        assert_eq!(report.score, 15);
        assert!(!report.suspicious);
    }

    #[test]
    fn warned_creator_ratio_is_parameterized() {
        let meta = ScoringMeta {
            title: "Stuff".to_string(),
            download_count: 1000,
            is_trending: false,
            creator_warned_count: 8,
        };
        let mut params = ScoreParams::default();
        let with_default = score(&meta, &inspection(&["a.package"], true, false), &params);
        assert_eq!(with_default.score, 10); // 8/10 > 0.7

        params.creator_ratio_denominator = 20;
        let with_larger = score(&meta, &inspection(&["a.package"], true, false), &params);
        assert_eq!(with_larger.score, 0); // 8/20 <= 0.7
    }

    #[test]
    fn score_is_clamped_and_deterministic() {
        let meta = ScoringMeta {
            title: "PREMIUM vip only donate".to_string(),
            download_count: 0,
            is_trending: true,
            creator_warned_count: 100,
        };
        let insp = inspection(&["read.me.txt"], false, false);
        let a = score(&meta, &insp, &ScoreParams::default());
        let b = score(&meta, &insp, &ScoreParams::default());
        assert_eq!(a.score, b.score);
        assert_eq!(a.reasons, b.reasons);
        assert!(a.score <= 100);
    }
}
