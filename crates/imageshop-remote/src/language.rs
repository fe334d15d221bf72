use regex::Regex;
use std::sync::OnceLock;

/// Language used when nothing in the table matches.
pub const FALLBACK_LANGUAGE: &str = "en";

enum Matcher {
    Exact(&'static str),
    Pattern(fn() -> &'static Regex),
}

fn english_locale() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^en_").expect("valid regex"))
}

const SUPPORTED: &[(&str, &[Matcher])] = &[
    (
        "dk",
        &[
            Matcher::Exact("da"),
            Matcher::Exact("dk"),
            Matcher::Exact("da_DK"),
        ],
    ),
    ("en", &[Matcher::Pattern(english_locale)]),
    (
        "no",
        &[
            Matcher::Exact("nb"),
            Matcher::Exact("nn"),
            Matcher::Exact("nb_NO"),
            Matcher::Exact("nn_NO"),
        ],
    ),
    (
        "sv",
        &[
            Matcher::Exact("se"),
            Matcher::Exact("sv"),
            Matcher::Exact("sv_SE"),
        ],
    ),
];

/// Map a host locale to the DAM's language code.
///
/// Two-character locales are ISO-639-1 already and are only lowercased. Longer
/// ones are looked up in the supported-language table; anything unknown
/// becomes [`FALLBACK_LANGUAGE`].
pub fn resolve_language(locale: &str) -> String {
    if locale.chars().count() == 2 {
        return locale.to_lowercase();
    }
    SUPPORTED
        .iter()
        .find(|(_, matchers)| {
            matchers.iter().any(|m| match m {
                Matcher::Exact(s) => *s == locale,
                Matcher::Pattern(re) => re().is_match(locale),
            })
        })
        .map_or(FALLBACK_LANGUAGE, |(code, _)| *code)
        .to_owned()
}
