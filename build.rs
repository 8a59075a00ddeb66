use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source roots checked by the hygiene scan. The build fails on the first rule
// violation found under any of them.
const SOURCE_ROOTS: [&str; 4] = ["analysis", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED", "CORRECTED", "FIX", "FIXES", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE",
];

#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWord,
    StarsInComment,
    AllCapsComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWord => format!(r"(//|/\*).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::AllCapsComment => r"(//|/\*).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn explanation(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "Underscore-prefixed names are not allowed. Use the binding or remove it."
            }
            Rule::ForbiddenWord => {
                "Comments must describe the code, not its edit history (FIX, NEW, CHANGE, UPDATE, ...)."
            }
            Rule::StarsInComment => "The '**' pattern is only allowed in /// doc comments.",
            Rule::AllCapsComment => "Comments whose letters are all uppercase are not allowed.",
            Rule::AllowDeadCode => "#[allow(dead_code)] is not allowed. Use the code or delete it.",
        }
    }

    /// Second-stage filter applied to lines the regex matched.
    fn is_violation(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscorePrefix => !trimmed.starts_with("//") && !underscore_in_string(line),
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !trimmed.starts_with("///"),
            Rule::AllCapsComment => {
                let Some(start) = line.find("//").or_else(|| line.find("/*")) else {
                    return false;
                };
                let text = line[start..].trim_start_matches(['/', '*', '!']);
                let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
                !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
            }
        }
    }
}

// True when a quoted segment of the line holds an underscore, in which case the
// match is treated as string content rather than an identifier.
fn underscore_in_string(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

struct RuleCollector {
    rule: Rule,
    file_path: PathBuf,
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

impl RuleCollector {
    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut msg = format!(
            "\n❌ ERROR: {} source hygiene violation(s) in {}:\n",
            self.violations.len(),
            self.file_path.display()
        );
        for v in &self.violations {
            msg.push_str(&format!("   {v}\n"));
        }
        msg.push_str(&format!("\n⚠️ {}\n", self.rule.explanation()));
        Some(msg)
    }
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_ROOTS
        .iter()
        .filter(|root| Path::new(root).is_dir())
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in rust_sources() {
        let mut collector = RuleCollector {
            rule,
            file_path: path.clone(),
            violations: Vec::new(),
        };
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(message) = collector.error_message() {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    for rule in [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::AllCapsComment,
        Rule::AllowDeadCode,
    ] {
        if let Err(e) = scan(rule) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
