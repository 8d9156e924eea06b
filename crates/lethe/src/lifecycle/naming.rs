//! Decorative names for reforged crystals

use rand::Rng;

/// Source of the randomness used for decorative naming.
pub trait NameSource: Send + Sync {
    /// An index in `0..upper`. `upper` is never zero.
    fn pick(&self, upper: usize) -> usize;
}

/// [`NameSource`] backed by the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNames;

impl NameSource for RandomNames {
    fn pick(&self, upper: usize) -> usize {
        if upper == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..upper)
    }
}

const PREFIXES: &[&str] = &[
    "Ancient",
    "Radiant",
    "Forgotten",
    "Eternal",
    "Shattered",
    "Gilded",
    "Silent",
    "Umbral",
    "Verdant",
    "Ashen",
];

const SUFFIXES: &[&str] = &[
    "Codex",
    "Relic",
    "Chronicle",
    "Sigil",
    "Tome",
    "Shard",
    "Archive",
    "Lantern",
    "Grimoire",
    "Monolith",
];

/// `"{Prefix} {Keyword} {Suffix}"`, with "Nameless" standing in for a missing keyword
pub fn legendary_name(source: &dyn NameSource, keyword: Option<&str>) -> String {
    let prefix = PREFIXES[source.pick(PREFIXES.len()) % PREFIXES.len()];
    let suffix = SUFFIXES[source.pick(SUFFIXES.len()) % SUFFIXES.len()];
    let middle = keyword
        .filter(|k| !k.is_empty())
        .map(title_case)
        .unwrap_or_else(|| "Nameless".to_string());

    format!("{prefix} {middle} {suffix}")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
