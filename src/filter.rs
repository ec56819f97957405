/// Outcome of the keyword stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub accepted: bool,
    pub reason: String,
}

impl Verdict {
    fn accept() -> Self {
        Self {
            accepted: true,
            reason: "Passed basic filter".to_string(),
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            accepted: false,
            reason,
        }
    }
}

/// Cheap keyword filter run before any postings reach the classifier.
#[derive(Debug, Clone)]
pub struct RuleFilter {
    reject_title: Vec<String>,
    require_description: Vec<String>,
}

impl RuleFilter {
    pub fn new(reject_title: &[String], require_description: &[String]) -> Self {
        let lower = |terms: &[String]| {
            terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            reject_title: lower(reject_title),
            require_description: lower(require_description),
        }
    }

    pub fn is_relevant(&self, title: &str, description: &str) -> Verdict {
        let title_lower = title.to_lowercase();

        let hits: Vec<&str> = self
            .reject_title
            .iter()
            .filter(|term| title_lower.contains(term.as_str()))
            .map(String::as_str)
            .collect();
        if !hits.is_empty() {
            return Verdict::reject(format!("Title contained: {}", hits.join(", ")));
        }

        if !self.require_description.is_empty() {
            let desc_lower = description.to_lowercase();
            if !self
                .require_description
                .iter()
                .any(|term| desc_lower.contains(term.as_str()))
            {
                return Verdict::reject("Missing required tech keywords".to_string());
            }
        }

        Verdict::accept()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn default_filter() -> RuleFilter {
        RuleFilter::new(
            &terms(&["senior", "lead", "manager", ".net", "c#"]),
            &terms(&["python", "sql", "etl", "data"]),
        )
    }

    #[test]
    fn test_rejects_senior_title() {
        let verdict = default_filter().is_relevant("Senior Backend Engineer", "Python and SQL");
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("senior"));
    }

    #[test]
    fn test_reason_lists_every_matched_title_term() {
        let verdict = default_filter().is_relevant("Senior Lead C# Developer", "python");
        assert_eq!(verdict.reason, "Title contained: senior, lead, c#");
    }

    #[test]
    fn test_title_check_runs_before_description_check() {
        let verdict = default_filter().is_relevant("Engineering Manager", "nothing relevant");
        assert!(verdict.reason.starts_with("Title contained"));
    }

    #[test]
    fn test_rejects_missing_required_terms_regardless_of_title() {
        let verdict = default_filter().is_relevant("Utvikler", "We build mobile apps in Swift");
        assert!(!verdict.accepted);
        assert_eq!(verdict.reason, "Missing required tech keywords");
    }

    #[test]
    fn test_accepts_relevant_posting() {
        let verdict = default_filter().is_relevant("Dataingeniør", "Vi bruker PYTHON og dbt");
        assert!(verdict.accepted);
        assert_eq!(verdict.reason, "Passed basic filter");
    }

    #[test]
    fn test_is_deterministic() {
        let filter = default_filter();
        let a = filter.is_relevant("Backend Engineer", "ETL pipelines");
        let b = filter.is_relevant("Backend Engineer", "ETL pipelines");
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_require_list_only_checks_title() {
        let filter = RuleFilter::new(&terms(&["Senior"]), &[]);
        assert!(filter.is_relevant("Developer", "").accepted);
        assert!(!filter.is_relevant("SENIOR Developer", "").accepted);
    }
}
