//! Opt-in source rewrite for programs written against Foundation.
//!
//! The wasm SDK ships without most of Foundation, so a few common idioms are
//! mapped onto the standard library before staging.

use once_cell::sync::Lazy;
use regex::Regex;

static COMPONENTS_SEPARATED_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\w+)\.components\(separatedBy:\s*"([^"]+)"\)"#).expect("components regex")
});
static IMPORT_FOUNDATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^import Foundation[ \t]*$").expect("import regex"));
static NSSTRING: Lazy<Regex> = Lazy::new(|| Regex::new(r"NSString").expect("NSString regex"));

/// Rewrite Foundation idioms into standard-library equivalents.
///
/// - `x.components(separatedBy: "s")` becomes `x.split(separator: "s").map(String.init)`
/// - `import Foundation` lines are blanked
/// - `NSString` becomes `String`
pub fn rewrite_foundation_idioms(source: &str) -> String {
    let rewritten =
        COMPONENTS_SEPARATED_BY.replace_all(source, r#"$1.split(separator: "$2").map(String.init)"#);
    let rewritten = IMPORT_FOUNDATION.replace_all(&rewritten, "").into_owned();
    NSSTRING.replace_all(&rewritten, "String").into_owned()
}
