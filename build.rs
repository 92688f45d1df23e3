use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::Path;
use walkdir::WalkDir;

/// Directories holding the crate's Rust sources.
const SOURCE_DIRS: [&str; 6] = ["ilc", "linalg", "pixpix", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED", "CORRECTED", "FIXES", "FIX", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE",
];

/// A source lint: a line regex plus a filter deciding whether a matching
/// line is really a violation.
#[derive(Clone, Copy)]
enum Rule {
    UnderscoreBinding,
    AllowDeadCode,
    ForbiddenCommentWord,
    StarsInComment,
    ShoutingComment,
}

impl Rule {
    const ALL: [Rule; 5] = [
        Rule::UnderscoreBinding,
        Rule::AllowDeadCode,
        Rule::ForbiddenCommentWord,
        Rule::StarsInComment,
        Rule::ShoutingComment,
    ];

    fn pattern(self) -> String {
        match self {
            Rule::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            Rule::ForbiddenCommentWord => format!(r"//.*\b({})\b", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"//.*\*\*".to_string(),
            Rule::ShoutingComment => r"//".to_string(),
        }
    }

    fn message(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => {
                "underscore-prefixed bindings; use the value or drop the binding"
            }
            Rule::AllowDeadCode => "#[allow(dead_code)]; use the item or delete it",
            Rule::ForbiddenCommentWord => {
                "comments narrating edits (FIX, NEW, CHANGE, UPDATE, ...); describe the code instead"
            }
            Rule::StarsInComment => "'**' emphasis in line comments",
            Rule::ShoutingComment => "comments written entirely in capitals",
        }
    }

    fn is_violation(self, line: &str) -> bool {
        match self {
            Rule::UnderscoreBinding => !is_comment(line) && !underscore_only_in_strings(line),
            Rule::AllowDeadCode => true,
            Rule::ForbiddenCommentWord => true,
            Rule::StarsInComment => !line.trim_start().starts_with("///"),
            Rule::ShoutingComment => comment_text(line).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }),
        }
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

/// True when every underscore-prefixed word of the line sits inside a string
/// literal, as in `"ilc-worker-{index}"` or a `#[serde(...)]` argument.
fn underscore_only_in_strings(line: &str) -> bool {
    line.split('"')
        .step_by(2)
        .all(|code| !code.split(|c: char| !(c.is_alphanumeric() || c == '_')).any(|word| {
            word.starts_with('_') && word.len() > 1
        }))
}

/// Text of a line comment, without its `//`, `///` or `//!` marker.
fn comment_text(line: &str) -> Option<&str> {
    let start = line.find("//")?;
    Some(line[start..].trim_start_matches('/').trim_start_matches('!').trim())
}

struct Violations<'r> {
    rule: Rule,
    lines: &'r mut Vec<String>,
}

impl Sink for Violations<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(text) {
            let line_number = mat.line_number().unwrap_or(0);
            self.lines.push(format!("{line_number}: {text}"));
        }
        Ok(true)
    }
}

fn scan(path: &Path, searcher: &mut Searcher) -> Result<Option<String>, Box<dyn Error>> {
    let mut report = String::new();
    for rule in Rule::ALL {
        let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
        let mut lines = Vec::new();
        searcher.search_path(
            &matcher,
            path,
            Violations {
                rule,
                lines: &mut lines,
            },
        )?;
        if !lines.is_empty() {
            report.push_str(&format!("\n{}: {}\n", path.display(), rule.message()));
            for line in lines {
                report.push_str(&format!("   {line}\n"));
            }
        }
    }
    Ok((!report.is_empty()).then_some(report))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let mut searcher = Searcher::new();
    let mut failures = String::new();
    let sources = SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"));

    for entry in sources {
        match scan(entry.path(), &mut searcher) {
            Ok(Some(report)) => failures.push_str(&report),
            Ok(None) => {}
            Err(e) => {
                println!("cargo:warning=could not lint {}: {e}", entry.path().display());
            }
        }
    }

    if !failures.is_empty() {
        eprintln!("\nSource lint violations in pixel-ilc:{failures}");
        std::process::exit(1);
    }
}
