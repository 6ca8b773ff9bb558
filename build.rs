use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source trees held to the coding policy. Everything else (target/, vendored
// material, the build script itself) is left alone.
const SOURCE_DIRS: [&str; 3] = ["hypergrad", "tests", "benches"];

const FORBIDDEN_WORDS: &str = concat!(
    "FIXED|CORRECTED|FIX|FIXES|NEW|",
    "CHANGED|CHANGES|CHANGE|",
    "MODIFIED|MODIFIES|MODIFY|",
    "UPDATED|UPDATES|UPDATE"
);

#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWord,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWord => format!(r"(//|/\*).*(?:{FORBIDDEN_WORDS})"),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::UppercaseComment => r"(//|/\*).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "underscore-prefixed names. \
                 Either use the binding (dropping the underscore) or remove it"
            }
            Rule::ForbiddenWord => {
                "comments narrating edits (FIX, NEW, CHANGE, UPDATE, ...). Remove them completely"
            }
            Rule::StarsInComment => "'**' in regular comments. It is only allowed in doc comments",
            Rule::UppercaseComment => {
                "comments whose alphabetic characters are all uppercase. Delete or rewrite them"
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] attributes. Either use the code or remove it"
            }
        }
    }

    /// Whether a line matched by `pattern` is an actual violation.
    fn is_violation(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscorePrefix => {
                !trimmed.starts_with("//") && !underscore_only_in_strings(line)
            }
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !is_doc_comment(trimmed),
            Rule::UppercaseComment => match comment_body(line) {
                Some(body) => {
                    let mut letters = body.chars().filter(|c| c.is_alphabetic()).peekable();
                    letters.peek().is_some() && letters.all(char::is_uppercase)
                }
                None => false,
            },
        }
    }
}

fn is_doc_comment(trimmed: &str) -> bool {
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// Text after the comment marker, if the line carries a comment.
fn comment_body(line: &str) -> Option<&str> {
    let start = line.find("//")?;
    Some(line[start..].trim_start_matches(['/', '!']).trim())
}

// Every underscore on the line sits between a pair of double quotes.
fn underscore_only_in_strings(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .all(|(i, part)| i % 2 == 1 || !part.contains("_"))
}

struct RuleCollector {
    rule: Rule,
    violations: Vec<String>,
}

impl Sink for RuleCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn source_files() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn check_file(rule: Rule, matcher: &RegexMatcher, path: &Path) -> Result<(), Box<dyn Error>> {
    let mut collector = RuleCollector {
        rule,
        violations: Vec::new(),
    };
    Searcher::new().search_path(matcher, path, &mut collector)?;
    if collector.violations.is_empty() {
        return Ok(());
    }

    let mut error_msg = format!(
        "\n❌ ERROR: Found {} violations in {}:\n",
        collector.violations.len(),
        path.display()
    );
    for violation in &collector.violations {
        error_msg.push_str(&format!("   {violation}\n"));
    }
    error_msg.push_str(&format!(
        "\n⚠️ This project forbids {}.\n",
        rule.describe()
    ));
    Err(error_msg.into())
}

fn scan_sources() -> Result<(), Box<dyn Error>> {
    let files = source_files();
    for rule in [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::UppercaseComment,
        Rule::AllowDeadCode,
    ] {
        let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
        for path in &files {
            check_file(rule, &matcher, path)?;
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if let Err(e) = scan_sources() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
