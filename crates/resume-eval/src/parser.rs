//! Best-effort structured fields from raw resume text.
//!
//! Parsing never fails: anything that cannot be identified with confidence
//! is left empty. The evaluator always sees the full text as well, so a miss
//! here degrades context rather than correctness.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fields recovered from a resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Number of leading non-empty lines searched for the candidate's name.
const NAME_SEARCH_LINES: usize = 5;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid regex")
});

/// Tried in order; the first pattern with a plausible match wins.
static PHONE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // +44 20 7946 0958, +1-555-123-4567
        r"\+\d{1,3}[\s.-]?\(?\d{1,4}\)?(?:[\s.-]?\d{2,4}){2,4}",
        // (555) 123-4567
        r"\(\d{3}\)\s?\d{3}[-.\s]?\d{4}",
        // 555-123-4567, 555.123.4567, 5551234567
        r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b",
        // 555-1234
        r"\b\d{3}[-.]\d{4}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static NAME_SEGMENT_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,|•·\t]|\s[-–]\s").expect("valid regex"));

/// Lines that label a section rather than name a person.
const HEADER_WORDS: &[&str] = &[
    "resume",
    "résumé",
    "curriculum",
    "vitae",
    "cv",
    "contact",
    "profile",
    "summary",
    "objective",
    "experience",
    "education",
    "skills",
    "references",
];

/// Canonical skill name followed by extra spellings that map to it.
const SKILL_VOCABULARY: &[(&str, &[&str])] = &[
    ("Python", &[]),
    ("JavaScript", &[]),
    ("TypeScript", &[]),
    ("Java", &[]),
    ("C++", &[]),
    ("C#", &[]),
    ("Go", &["Golang"]),
    ("Rust", &[]),
    ("Ruby", &[]),
    ("PHP", &[]),
    ("Kotlin", &[]),
    ("Swift", &[]),
    ("Scala", &[]),
    ("SQL", &[]),
    ("React", &[]),
    ("Vue", &[]),
    ("Angular", &[]),
    ("Node.js", &["NodeJS"]),
    ("Django", &[]),
    ("Flask", &[]),
    ("FastAPI", &[]),
    ("Spring", &[]),
    ("PostgreSQL", &["Postgres"]),
    ("MySQL", &[]),
    ("MongoDB", &[]),
    ("Redis", &[]),
    ("SQLite", &[]),
    ("AWS", &[]),
    ("Azure", &[]),
    ("GCP", &[]),
    ("Docker", &[]),
    ("Kubernetes", &["K8s"]),
    ("Terraform", &[]),
    ("CI/CD", &[]),
    ("Git", &[]),
    ("Linux", &[]),
    ("REST API", &["REST APIs", "RESTful"]),
    ("GraphQL", &[]),
    ("Microservices", &[]),
    ("Machine Learning", &[]),
    ("TensorFlow", &[]),
    ("PyTorch", &[]),
    ("Pandas", &[]),
];

struct SkillMatcher {
    name: &'static str,
    regex: Regex,
}

/// Skill names contain `+`, `#`, `.` and `/`, so `\b` is not a usable
/// boundary; a neighbour must not be a word character, `+` or `#`.
static SKILL_MATCHERS: LazyLock<Vec<SkillMatcher>> = LazyLock::new(|| {
    SKILL_VOCABULARY
        .iter()
        .map(|(name, aliases)| {
            let alternatives: Vec<String> = std::iter::once(*name)
                .chain(aliases.iter().copied())
                .map(|s| regex::escape(s).replace(' ', r"\s+"))
                .collect();
            // "Go" and "C#" collide with ordinary words when matched case-insensitively.
            let flags = if name.len() <= 2 { "" } else { "(?i)" };
            let pattern = format!(
                r"{}(?:^|[^\w+#])(?:{})(?:$|[^\w+#])",
                flags,
                alternatives.join("|")
            );
            SkillMatcher {
                name,
                regex: Regex::new(&pattern).expect("valid skill regex"),
            }
        })
        .collect()
});

pub fn parse(raw_text: &str) -> StructuredRecord {
    let _span = tracing::debug_span!("parser.parse", chars = raw_text.len()).entered();

    StructuredRecord {
        name: extract_name(raw_text),
        email: extract_email(raw_text),
        phone: extract_phone(raw_text),
        skills: extract_skills(raw_text),
    }
}

pub fn extract_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

pub fn extract_phone(text: &str) -> Option<String> {
    PHONE_RES.iter().find_map(|re| {
        re.find_iter(text)
            .map(|m| m.as_str().trim())
            .find(|candidate| is_plausible_phone(candidate))
            .map(str::to_string)
    })
}

fn is_plausible_phone(candidate: &str) -> bool {
    let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=15).contains(&digits)
}

pub fn extract_name(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(NAME_SEARCH_LINES)
        .flat_map(|line| NAME_SEGMENT_SPLIT_RE.split(line))
        .map(str::trim)
        .find(|segment| looks_like_name(segment))
        .map(|segment| segment.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn looks_like_name(segment: &str) -> bool {
    if segment.contains('@') || segment.contains(':') || segment.chars().any(|c| c.is_ascii_digit())
    {
        return false;
    }

    let words: Vec<&str> = segment.split_whitespace().collect();
    if !(2..=4).contains(&words.len()) {
        return false;
    }

    words.iter().all(|word| {
        let lower = word.to_lowercase();
        let mut chars = word.chars();
        let starts_upper = chars.next().is_some_and(|c| c.is_uppercase());
        starts_upper
            && chars.all(|c| c.is_alphabetic() || matches!(c, '.' | '-' | '\''))
            && !HEADER_WORDS.contains(&lower.trim_end_matches('.'))
    })
}

/// Vocabulary hits in order of first appearance, without duplicates.
pub fn extract_skills(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, &'static str)> = SKILL_MATCHERS
        .iter()
        .filter_map(|matcher| matcher.regex.find(text).map(|m| (m.start(), matcher.name)))
        .collect();
    found.sort_by_key(|(position, _)| *position);
    found.into_iter().map(|(_, name)| name.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_resume() {
        let record = parse("John Doe, john@x.com, 555-1234, Skills: Python, SQL");
        assert_eq!(
            record,
            StructuredRecord {
                name: Some("John Doe".to_string()),
                email: Some("john@x.com".to_string()),
                phone: Some("555-1234".to_string()),
                skills: vec!["Python".to_string(), "SQL".to_string()],
            }
        );
    }

    #[test]
    fn test_multi_line_resume() {
        let text = "RESUME\n\nMaria Garcia Lopez\nSenior Backend Engineer\n\
                    maria.garcia@example.org | (415) 555-0199\n\n\
                    Experience\nBuilt microservices in Go and Rust on Kubernetes.\n\
                    Skills: PostgreSQL, Docker, CI/CD, Git";
        let record = parse(text);

        assert_eq!(record.name.as_deref(), Some("Maria Garcia Lopez"));
        assert_eq!(record.email.as_deref(), Some("maria.garcia@example.org"));
        assert_eq!(record.phone.as_deref(), Some("(415) 555-0199"));
        assert_eq!(
            record.skills,
            vec![
                "Microservices",
                "Go",
                "Rust",
                "Kubernetes",
                "PostgreSQL",
                "Docker",
                "CI/CD",
                "Git"
            ]
        );
    }

    #[test]
    fn test_empty_text_yields_empty_record() {
        assert_eq!(parse(""), StructuredRecord::default());
        assert_eq!(parse("   \n\n  "), StructuredRecord::default());
    }

    #[test]
    fn test_unrecognizable_text() {
        let record = parse("lorem ipsum dolor sit amet 42");
        assert_eq!(record.name, None);
        assert_eq!(record.email, None);
        assert_eq!(record.phone, None);
        assert!(record.skills.is_empty());
    }

    #[test]
    fn test_name_skips_header_and_contact_lines() {
        assert_eq!(
            extract_name("Curriculum Vitae\njane@example.com\nJane Q. Public\n"),
            Some("Jane Q. Public".to_string())
        );
    }

    #[test]
    fn test_name_only_searched_near_top() {
        let text = "one\ntwo\nthree\nfour\nfive\nLate Name";
        assert_eq!(extract_name(text), None);
    }

    #[test]
    fn test_name_rejects_long_titles() {
        assert_eq!(extract_name("Senior Staff Software Engineer Lead"), None);
    }

    #[test]
    fn test_phone_formats() {
        assert_eq!(
            extract_phone("call 555.123.4567 now").as_deref(),
            Some("555.123.4567")
        );
        assert_eq!(
            extract_phone("Tel: +44 20 7946 0958").as_deref(),
            Some("+44 20 7946 0958")
        );
        assert_eq!(extract_phone("2019-2021 at Acme"), None);
    }

    #[test]
    fn test_skills_are_deduplicated_in_first_seen_order() {
        let skills = extract_skills("Docker, python, Docker again, PYTHON, AWS");
        assert_eq!(skills, vec!["Docker", "Python", "AWS"]);
    }

    #[test]
    fn test_skills_respect_boundaries() {
        let skills = extract_skills("JavaScript and PostgreSQL, C++ and C#");
        assert_eq!(skills, vec!["JavaScript", "PostgreSQL", "C++", "C#"]);
    }

    #[test]
    fn test_short_skills_are_case_sensitive() {
        assert!(extract_skills("we go to the office").is_empty());
        assert_eq!(extract_skills("Golang services"), vec!["Go"]);
    }

    #[test]
    fn test_aliases_map_to_canonical_name() {
        assert_eq!(
            extract_skills("Postgres on k8s"),
            vec!["PostgreSQL", "Kubernetes"]
        );
    }
}
