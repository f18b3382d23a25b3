//! Unified diff parsing and changed-function extraction

use std::collections::BTreeSet;

use similar::TextDiff;

use super::Hunk;

/// Unified diff of two texts
pub fn unified_diff(old: &str, new: &str, old_name: &str, new_name: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(old_name, new_name)
        .to_string()
}

/// Parse the hunks of a unified diff or a GitHub `patch` field
///
/// File headers and anything between hunks are ignored; a hunk ends once
/// the line counts from its `@@` header are consumed.
pub fn parse_hunks(patch: &str) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut current: Option<(Hunk, u32, u32)> = None;

    for line in patch.lines() {
        if line.starts_with("@@") {
            if let Some((hunk, _, _)) = current.take() {
                hunks.push(hunk);
            }
            current = parse_hunk_header(line).map(|h| (h, 0, 0));
            continue;
        }

        let Some((hunk, old_seen, new_seen)) = current.as_mut() else {
            continue;
        };
        if line.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        }

        match line.chars().next() {
            Some('-') => *old_seen += 1,
            Some('+') => *new_seen += 1,
            _ => {
                *old_seen += 1;
                *new_seen += 1;
            }
        }
        hunk.lines.push(line.to_string());

        if *old_seen >= hunk.old_lines && *new_seen >= hunk.new_lines {
            if let Some((hunk, _, _)) = current.take() {
                hunks.push(hunk);
            }
        }
    }

    if let Some((hunk, _, _)) = current {
        hunks.push(hunk);
    }
    hunks
}

/// `@@ -12,7 +12,8 @@ def multiply(a, b):`
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let ranges = &rest[..end];
    let header = rest[end + 3..].trim().to_string();

    let mut parts = ranges.split_whitespace();
    let (old_start, old_lines) = parse_range(parts.next()?.strip_prefix('-')?)?;
    let (new_start, new_lines) = parse_range(parts.next()?.strip_prefix('+')?)?;

    Some(Hunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        header,
        lines: Vec::new(),
    })
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Name of the function declared on this line, if any
///
/// Recognizes Python, Rust, Go and JavaScript declarations.
pub fn function_name(line: &str) -> Option<String> {
    let mut rest = line.trim_start();
    loop {
        let stripped = ["pub(crate) ", "pub ", "async ", "export ", "static ", "const "]
            .iter()
            .find_map(|prefix| rest.strip_prefix(prefix));
        match stripped {
            Some(s) => rest = s.trim_start(),
            None => break,
        }
    }

    let rest = ["def ", "fn ", "function ", "func "]
        .iter()
        .find_map(|kw| rest.strip_prefix(kw))?
        .trim_start();

    // Go methods: func (r *Recv) Name(
    let rest = match rest.strip_prefix('(') {
        Some(recv) => recv.split_once(')')?.1.trim_start(),
        None => rest,
    };

    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    let next = rest[name.len()..].chars().next();
    if name.is_empty() || !matches!(next, Some('(') | Some('<')) {
        return None;
    }
    Some(name)
}

/// Declaration line of the nearest function at or above `line_index` (zero-based)
///
/// Suitable as a hunk header: [`changed_functions`] reads it back with
/// [`function_name`].
pub fn enclosing_declaration<'a>(lines: &[&'a str], line_index: usize) -> Option<&'a str> {
    lines
        .iter()
        .take(line_index + 1)
        .rev()
        .find(|line| function_name(line).is_some())
        .map(|line| line.trim())
}

/// Functions touched by the changed lines of the given hunks
///
/// A changed line belongs to the closest declaration above it inside the
/// hunk, falling back to the hunk header's function.
pub fn changed_functions(hunks: &[Hunk]) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();

    for hunk in hunks {
        let mut current = function_name(&hunk.header);
        for line in &hunk.lines {
            let (marker, body) = match line.chars().next() {
                Some(c @ ('+' | '-' | ' ')) => (c, &line[1..]),
                _ => (' ', line.as_str()),
            };

            if let Some(name) = function_name(body) {
                current = Some(name);
            }
            if marker != ' ' && !body.trim().is_empty() {
                if let Some(name) = &current {
                    changed.insert(name.clone());
                }
            }
        }
    }

    changed
}

/// Conventional unit-test name for a function
pub fn test_name_for(function: &str) -> String {
    format!("test_{}", function)
}

/// Whether a test id (e.g. `tests/test_calc.py::test_add` or
/// `calc::tests::test_add`) targets the given function
pub fn test_targets(test_id: &str, function: &str) -> bool {
    let leaf = test_id.rsplit("::").next().unwrap_or(test_id);
    let leaf = leaf.rsplit('.').next().unwrap_or(leaf);
    let expected = test_name_for(function);
    leaf == expected
        || leaf
            .strip_prefix(&expected)
            .is_some_and(|rest| rest.starts_with('_'))
        || leaf.eq_ignore_ascii_case(&format!("Test{}", function))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH: &str = "\
--- a/calculator.py
+++ b/calculator.py
@@ -1,5 +1,5 @@
 def add(a, b):
-    return a + b
+    return b + a

 def subtract(a, b):
     return a - b
@@ -10,2 +10,3 @@ def multiply(a, b):
     # multiply two numbers
-    return a * b
+    result = a * b
+    return result
";

    #[test]
    fn test_parse_hunks() {
        let hunks = parse_hunks(PATCH);
        assert_eq!(hunks.len(), 2);
        assert_eq!((hunks[0].old_start, hunks[0].old_lines), (1, 5));
        assert_eq!(hunks[1].header, "def multiply(a, b):");
        assert_eq!(hunks[1].lines.len(), 4);
    }

    #[test]
    fn test_parse_single_line_range() {
        let hunks = parse_hunks("@@ -3 +3 @@\n-x\n+y\n");
        assert_eq!((hunks[0].old_lines, hunks[0].new_lines), (1, 1));
    }

    #[test]
    fn test_changed_functions_from_body_and_header() {
        let hunks = parse_hunks(PATCH);
        let changed = changed_functions(&hunks);
        assert_eq!(
            changed.into_iter().collect::<Vec<_>>(),
            vec!["add".to_string(), "multiply".to_string()]
        );
    }

    #[test]
    fn test_function_name_languages() {
        assert_eq!(function_name("    def helper(x):").as_deref(), Some("helper"));
        assert_eq!(function_name("async def fetch():").as_deref(), Some("fetch"));
        assert_eq!(function_name("pub async fn run<T>(x: T)").as_deref(), Some("run"));
        assert_eq!(function_name("func (s *Server) Serve() error {").as_deref(), Some("Serve"));
        assert_eq!(function_name("export function render(props) {").as_deref(), Some("render"));
        assert_eq!(function_name("    return define(x)"), None);
        assert_eq!(function_name("fn"), None);
    }

    #[test]
    fn test_unified_diff_round_trips_through_parser() {
        let old = "def add(a, b):\n    return a + b\n";
        let new = "def add(a, b):\n    return a + b + 0\n";
        let diff = unified_diff(old, new, "a/calc.py", "b/calc.py");
        assert!(diff.contains("--- a/calc.py"));

        let changed = changed_functions(&parse_hunks(&diff));
        assert!(changed.contains("add"));
    }

    #[test]
    fn test_enclosing_declaration() {
        let lines = ["def a():", "    x = 1", "    def b(y):", "    y = 2"];
        assert_eq!(enclosing_declaration(&lines, 1), Some("def a():"));
        assert_eq!(enclosing_declaration(&lines, 3), Some("def b(y):"));
        assert_eq!(enclosing_declaration(&["x = 1"], 0), None);
    }

    #[test]
    fn test_declaration_header_survives_changed_functions() {
        let lines = ["def multiply(a, b):", "    x = 1"];
        let hunk = Hunk {
            old_start: 6,
            old_lines: 1,
            new_start: 6,
            new_lines: 1,
            header: enclosing_declaration(&lines, 1).unwrap_or_default().to_string(),
            lines: vec!["-    return a * b".into(), "+    return b * a".into()],
        };
        assert!(changed_functions(&[hunk]).contains("multiply"));
    }

    #[test]
    fn test_test_targets() {
        assert!(test_targets("tests/test_calc.py::test_multiply", "multiply"));
        assert!(test_targets("calc::tests::test_multiply_negative", "multiply"));
        assert!(test_targets("TestMultiply", "Multiply"));
        assert!(!test_targets("tests/test_calc.py::test_multiplyx", "multiply"));
        assert!(!test_targets("tests/test_calc.py::test_add", "multiply"));
    }
}
