use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Text after normalization plus the char-length change it introduced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    /// `chars(text) - chars(input)`.
    pub length_delta: isize,
}

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:(?P<grouped>\d{1,3}(?:,\d{3})+)|(?P<decimal>\d+\.\d+)|(?P<ordinal>\d+)(?i:st|nd|rd|th)|(?P<int>\d+)|(?P<roman>[IVXLCDM]{2,}))\b",
    )
    .unwrap_or_else(|err| panic!("number pattern failed to compile: {err}"))
});

/// Entries kept before the spelled-number cache starts over.
const SPELLED_CACHE_CAPACITY: usize = 4096;

static SPELLED_CACHE: Lazy<Mutex<HashMap<String, Option<String>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

const ONES: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [(u64, &str); 4] = [
    (1_000_000_000_000, "trillion"),
    (1_000_000_000, "billion"),
    (1_000_000, "million"),
    (1_000, "thousand"),
];

/// Canonical punctuation and spelled-out numbers, case preserved.
pub fn normalize(input: &str) -> Normalized {
    let canonical = canonicalize_punctuation(input);
    let text = spell_numbers(&canonical);
    let length_delta = text.chars().count() as isize - input.chars().count() as isize;
    Normalized { text, length_delta }
}

/// The form both book sentences and transcript tokens are compared in.
pub fn matching_form(input: &str) -> String {
    normalize(input).text.to_lowercase()
}

pub fn canonicalize_punctuation(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{02BC}' | '`' => {
                out.push('\'')
            }
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{00AB}'
            | '\u{00BB}' => out.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' | '\u{2002}' | '\u{2003}' | '\u{2007}' | '\u{2009}' | '\u{200A}'
            | '\u{202F}' | '\t' | '\n' | '\r' => out.push(' '),
            '\u{200B}' | '\u{FEFF}' | '\u{00AD}' => {}
            _ => out.push(c),
        }
    }
    out
}

fn spell_numbers(input: &str) -> String {
    NUMBER_RE
        .replace_all(input, |caps: &Captures<'_>| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            cached_spelling(whole, caps).unwrap_or_else(|| whole.to_string())
        })
        .into_owned()
}

fn cached_spelling(whole: &str, caps: &Captures<'_>) -> Option<String> {
    {
        let cache = SPELLED_CACHE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(hit) = cache.get(whole) {
            return hit.clone();
        }
    }
    let spelled = spell_capture(caps);
    let mut cache = SPELLED_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    insert_bounded(&mut cache, whole, spelled.clone(), SPELLED_CACHE_CAPACITY);
    spelled
}

/// Clears the cache once it holds `capacity` distinct entries.
fn insert_bounded(
    cache: &mut HashMap<String, Option<String>>,
    key: &str,
    value: Option<String>,
    capacity: usize,
) {
    if cache.len() >= capacity && !cache.contains_key(key) {
        tracing::trace!(entries = cache.len(), "normalize: spelled-number cache cleared");
        cache.clear();
    }
    cache.insert(key.to_string(), value);
}

fn spell_capture(caps: &Captures<'_>) -> Option<String> {
    if let Some(grouped) = caps.name("grouped") {
        let digits: String = grouped.as_str().chars().filter(|c| *c != ',').collect();
        return digits.parse::<u64>().ok().map(spell_integer);
    }
    if let Some(decimal) = caps.name("decimal") {
        let (int_part, frac_part) = decimal.as_str().split_once('.')?;
        let int_value = int_part.parse::<u64>().ok()?;
        let mut out = spell_integer(int_value);
        out.push_str(" point");
        for digit in frac_part.chars().filter_map(|c| c.to_digit(10)) {
            out.push(' ');
            out.push_str(ONES[digit as usize]);
        }
        return Some(out);
    }
    if let Some(ordinal) = caps.name("ordinal") {
        return ordinal.as_str().parse::<u64>().ok().map(spell_ordinal);
    }
    if let Some(int) = caps.name("int") {
        return int.as_str().parse::<u64>().ok().map(spell_integer);
    }
    if let Some(roman) = caps.name("roman") {
        return roman_value(roman.as_str()).map(|value| spell_integer(u64::from(value)));
    }
    None
}

/// English cardinal, hyphenating compound tens: `42` -> `forty-two`.
pub fn spell_integer(value: u64) -> String {
    if value == 0 {
        return ONES[0].to_string();
    }
    let mut parts: Vec<String> = Vec::new();
    let mut rest = value;
    if rest >= 1_000_000_000_000_000 {
        // Beyond trillions, read the leading digits as a plain count of trillions.
        parts.push(spell_integer(rest / 1_000_000_000_000));
        parts.push("trillion".to_string());
        rest %= 1_000_000_000_000;
    }
    for (scale, name) in SCALES {
        if rest >= scale {
            parts.push(spell_below_thousand(rest / scale));
            parts.push(name.to_string());
            rest %= scale;
        }
    }
    if rest > 0 {
        parts.push(spell_below_thousand(rest));
    }
    parts.join(" ")
}

fn spell_below_thousand(value: u64) -> String {
    let hundreds = value / 100;
    let rest = value % 100;
    let mut out = String::new();
    if hundreds > 0 {
        out.push_str(ONES[hundreds as usize]);
        out.push_str(" hundred");
    }
    if rest > 0 {
        if !out.is_empty() {
            out.push(' ');
        }
        if rest < 20 {
            out.push_str(ONES[rest as usize]);
        } else {
            out.push_str(TENS[(rest / 10) as usize]);
            if rest % 10 > 0 {
                out.push('-');
                out.push_str(ONES[(rest % 10) as usize]);
            }
        }
    }
    out
}

/// `21` -> `twenty-first`.
pub fn spell_ordinal(value: u64) -> String {
    let cardinal = spell_integer(value);
    let split = cardinal
        .rfind(|c| c == ' ' || c == '-')
        .map(|i| i + 1)
        .unwrap_or(0);
    let (head, last) = cardinal.split_at(split);
    let last = match last {
        "one" => "first".to_string(),
        "two" => "second".to_string(),
        "three" => "third".to_string(),
        "five" => "fifth".to_string(),
        "eight" => "eighth".to_string(),
        "nine" => "ninth".to_string(),
        "twelve" => "twelfth".to_string(),
        word if word.ends_with('y') => format!("{}ieth", &word[..word.len() - 1]),
        word => format!("{word}th"),
    };
    format!("{head}{last}")
}

/// Value of a canonical uppercase Roman numeral in `1..=3999`.
pub fn roman_value(numeral: &str) -> Option<u32> {
    if numeral.is_empty() {
        return None;
    }
    let digit = |c: char| -> Option<u32> {
        Some(match c {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            'L' => 50,
            'C' => 100,
            'D' => 500,
            'M' => 1000,
            _ => return None,
        })
    };
    let values = numeral.chars().map(digit).collect::<Option<Vec<_>>>()?;
    let mut total = 0u32;
    for (i, &value) in values.iter().enumerate() {
        match values.get(i + 1) {
            Some(&next) if next > value => total = total.checked_sub(value)?,
            _ => total += value,
        }
    }
    if !(1..=3999).contains(&total) || to_roman(total) != numeral {
        return None;
    }
    Some(total)
}

fn to_roman(mut value: u32) -> String {
    const TABLE: [(u32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (amount, symbol) in TABLE {
        while value >= amount {
            out.push_str(symbol);
            value -= amount;
        }
    }
    out
}

/// No alphanumeric content.
pub fn is_punctuation_only(text: &str) -> bool {
    !text.chars().any(char::is_alphanumeric)
}

pub fn is_sentence_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spelled_cache_stays_within_capacity() {
        let mut cache = HashMap::new();
        for n in 0..10 {
            insert_bounded(&mut cache, &n.to_string(), Some(spell_integer(n)), 4);
            assert!(cache.len() <= 4);
        }
        assert_eq!(cache.get("9"), Some(&Some("nine".to_string())));

        for n in 0..(SPELLED_CACHE_CAPACITY as u64 + 50) {
            normalize(&format!("{} ships", 100_000 + n));
        }
        let len = SPELLED_CACHE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len();
        assert!(len <= SPELLED_CACHE_CAPACITY, "cache holds {len}");
    }

    #[test]
    fn spells_years_in_thousands_form() {
        let out = normalize("1984");
        assert_eq!(out.text, "one thousand nine hundred eighty-four");
        assert_eq!(
            out.length_delta,
            out.text.chars().count() as isize - "1984".chars().count() as isize
        );
    }

    #[test]
    fn spells_roman_numerals() {
        assert_eq!(normalize("XIV").text, "fourteen");
        assert_eq!(normalize("Chapter XII").text, "Chapter twelve");
        // Single letters stay words, non-canonical forms stay text.
        assert_eq!(normalize("I am").text, "I am");
        assert_eq!(normalize("IIII").text, "IIII");
        assert_eq!(roman_value("MCMLXXXIV"), Some(1984));
        assert_eq!(roman_value("IC"), None);
    }

    #[test]
    fn spells_ordinals_decimals_and_grouped() {
        assert_eq!(normalize("the 21st day").text, "the twenty-first day");
        assert_eq!(normalize("3rd").text, "third");
        assert_eq!(normalize("12th").text, "twelfth");
        assert_eq!(normalize("40th").text, "fortieth");
        assert_eq!(normalize("3.5").text, "three point five");
        assert_eq!(normalize("1,000 men").text, "one thousand men");
        assert_eq!(normalize("42").text, "forty-two");
        assert_eq!(normalize("100").text, "one hundred");
        assert_eq!(normalize("0").text, "zero");
    }

    #[test]
    fn canonicalizes_unicode_punctuation() {
        let out = normalize("\u{201C}Don\u{2019}t\u{201D}\u{2014}wait\u{2026}");
        assert_eq!(out.text, "\"Don't\"-wait...");
        assert_eq!(out.length_delta, 2);
    }

    #[test]
    fn matching_form_lowercases() {
        assert_eq!(matching_form("Call me Ishmael."), "call me ishmael.");
        assert_eq!(matching_form("XIV Men"), "fourteen men");
    }

    #[test]
    fn spell_integer_scales() {
        assert_eq!(spell_integer(1_000_001), "one million one");
        assert_eq!(
            spell_integer(2_500_000_017),
            "two billion five hundred million seventeen"
        );
        assert_eq!(spell_integer(19), "nineteen");
        assert_eq!(spell_integer(90), "ninety");
    }

    #[test]
    fn punctuation_only_detection() {
        assert!(is_punctuation_only("--"));
        assert!(is_punctuation_only(""));
        assert!(!is_punctuation_only("a."));
    }
}
