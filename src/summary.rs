use serde::Serialize;
use std::time::Duration;

/// Per-language outcome of a translate run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LanguageSummary {
    pub language: String,
    pub files: usize,
    pub files_written: usize,
    pub translated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub remote_calls: usize,
    pub failed_keys: Vec<String>,
}

impl LanguageSummary {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub languages: Vec<LanguageSummary>,
    pub cancelled: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn language(&self, code: &str) -> Option<&LanguageSummary> {
        self.languages.iter().find(|l| l.language == code)
    }

    pub fn total_failed(&self) -> usize {
        self.languages.iter().map(|l| l.failed).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.total_failed() > 0
    }

    pub fn print(&self) {
        println!("\nTranslation Summary:");
        println!(
            "{:<10} {:<8} {:<12} {:<10} {:<8} {:<12} {:<12}",
            "Language", "Files", "Translated", "Skipped", "Failed", "Cache hits", "API calls"
        );
        println!("{}", "-".repeat(78));
        for lang in &self.languages {
            println!(
                "{:<10} {:<8} {:<12} {:<10} {:<8} {:<12} {:<12}",
                lang.language,
                lang.files,
                lang.translated,
                lang.skipped,
                lang.failed,
                lang.cache_hits,
                lang.remote_calls
            );
        }

        for lang in self.languages.iter().filter(|l| !l.failed_keys.is_empty()) {
            println!("\nFailed keys ({}):", lang.language);
            for key in &lang.failed_keys {
                println!("  {}", key);
            }
        }

        if self.cancelled {
            println!("\nRun cancelled; remaining files were not processed.");
        }
        println!("\nCompleted in {}", format_duration(self.elapsed.as_secs()));
    }
}

/// Diff counts for one language, as reported by `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LanguageStatus {
    pub language: String,
    pub files: usize,
    pub missing: usize,
    pub stale: usize,
    pub up_to_date: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub languages: Vec<LanguageStatus>,
}

impl StatusReport {
    pub fn language(&self, code: &str) -> Option<&LanguageStatus> {
        self.languages.iter().find(|l| l.language == code)
    }

    pub fn print(&self) {
        println!("\nTranslation Status:");
        println!("{:<10} {:<8} {:<10} {:<10} {:<12}", "Language", "Files", "Missing", "Outdated", "Up to date");
        println!("{}", "-".repeat(54));
        for lang in &self.languages {
            println!(
                "{:<10} {:<8} {:<10} {:<10} {:<12}",
                lang.language, lang.files, lang.missing, lang.stale, lang.up_to_date
            );
        }
    }
}

/// Format duration in seconds to human readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7260), "2h 1m");
    }

    #[test]
    fn test_failure_totals() {
        let mut fr = LanguageSummary::new("fr");
        fr.failed = 2;
        let summary = RunSummary {
            languages: vec![fr, LanguageSummary::new("de")],
            ..RunSummary::default()
        };
        assert_eq!(summary.total_failed(), 2);
        assert!(summary.has_failures());
        assert_eq!(summary.language("de").map(|l| l.failed), Some(0));
    }
}
