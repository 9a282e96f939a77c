//! Egyptian-Arabic surface normalisation and slot extraction.
//!
//! Canonicalisation is a pipeline of whole-word rule tables applied in the
//! order of [`RULE_TABLES`]. Each table rewrites the output of the table
//! before it, so `ماما` becomes `أمي` in the spelling table and `الأم` in the
//! kinship table, and `انبهني` becomes `نبهني` and then `ذكرني`.
//!
//! Every rule resolves to a fixed point of the whole pipeline (checked by the
//! tests), which keeps [`normalize`] idempotent on its own output.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{NormalizedUtterance, SlotKey};

static MARKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\u{064B}-\u{065F}\u{0670}\u{0640}]").expect("valid diacritics regex")
});

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[؟،؛?!.,:;"«»()\[\]]+"#).expect("valid punctuation regex"));

/// Prefixes Egyptian speech glues onto a word: "with/to", "for", "and".
const CLITICS: [char; 3] = ['ب', 'ل', 'و'];

#[derive(Debug, Clone, Copy)]
pub struct RuleTable {
    pub name: &'static str,
    pub rules: &'static [(&'static str, &'static str)],
}

/// Spelling variants and nicknames folded onto one written form.
const SPELLING_VARIANTS: RuleTable = RuleTable {
    name: "spelling_variants",
    rules: &[
        ("ماما", "أمي"),
        ("مامتي", "أمي"),
        ("امي", "أمي"),
        ("بابا", "أبي"),
        ("ابويا", "أبي"),
        ("ابوي", "أبي"),
        ("ابي", "أبي"),
        ("انبهني", "نبهني"),
        ("إنبهني", "نبهني"),
        ("نبهنى", "نبهني"),
        ("فكرنى", "فكرني"),
        ("ذكرنى", "ذكرني"),
        ("مراتى", "مراتي"),
        ("جوزى", "جوزي"),
        ("بكره", "بكرة"),
        ("النهاردة", "النهارده"),
        ("دلوقت", "دلوقتي"),
        ("رساله", "رسالة"),
        ("واتس", "واتساب"),
        ("الواتس", "واتساب"),
    ],
};

/// Dialect time adverbs to standard forms.
const TIME_ADVERBS: RuleTable = RuleTable {
    name: "time_adverbs",
    rules: &[
        ("بكرة", "غدا"),
        ("النهارده", "اليوم"),
        ("امبارح", "أمس"),
        ("إمبارح", "أمس"),
        ("دلوقتي", "الآن"),
        ("الصبح", "الصباح"),
        ("الضهر", "الظهر"),
        ("العصرية", "العصر"),
        ("العشية", "المساء"),
        ("بالليل", "ليلا"),
        ("بليل", "ليلا"),
    ],
};

/// Kinship terms used as contact aliases.
const KINSHIP_ALIASES: RuleTable = RuleTable {
    name: "kinship_aliases",
    rules: &[
        ("أمي", "الأم"),
        ("أبي", "الأب"),
        ("مراتي", "الزوجة"),
        ("جوزي", "الزوج"),
        ("اخويا", "الأخ"),
        ("أخويا", "الأخ"),
        ("اختي", "الأخت"),
        ("أختي", "الأخت"),
        ("ابني", "الابن"),
        ("بنتي", "البنت"),
        ("جدي", "الجد"),
        ("جدو", "الجد"),
        ("تيتة", "الجدة"),
        ("ستي", "الجدة"),
        ("خالتي", "الخالة"),
        ("عمتي", "العمة"),
        ("خالي", "الخال"),
        ("عمي", "العم"),
    ],
};

/// Command verbs and their synonyms.
const COMMAND_SYNONYMS: RuleTable = RuleTable {
    name: "command_synonyms",
    rules: &[
        ("كلم", "اتصل"),
        ("كلمي", "اتصل"),
        ("كلملي", "اتصل"),
        ("رن", "اتصل"),
        ("رني", "اتصل"),
        ("رنلي", "اتصل"),
        ("اتصلي", "اتصل"),
        ("ابعت", "أرسل"),
        ("ابعتي", "أرسل"),
        ("ابعتلي", "أرسل"),
        ("إبعت", "أرسل"),
        ("ارسل", "أرسل"),
        ("نبهني", "ذكرني"),
        ("فكرني", "ذكرني"),
        ("صحيني", "ذكرني"),
    ],
};

/// Titles written with and without the article in contact names.
const CONTACT_TITLES: RuleTable = RuleTable {
    name: "contact_titles",
    rules: &[
        ("الدكتور", "دكتور"),
        ("الدكتورة", "دكتورة"),
        ("الدكتوره", "دكتورة"),
        ("الاستاذ", "أستاذ"),
        ("الاستاذة", "أستاذة"),
    ],
};

/// Applied in this order by [`normalize`].
pub const RULE_TABLES: [RuleTable; 4] = [
    SPELLING_VARIANTS,
    TIME_ADVERBS,
    KINSHIP_ALIASES,
    COMMAND_SYNONYMS,
];

const CONTACT_TABLES: [RuleTable; 3] = [SPELLING_VARIANTS, KINSHIP_ALIASES, CONTACT_TITLES];

/// Verbs that introduce a contact, with the clitic that glues onto the
/// contact after them (`اتصل بأمي`, `ابعت لدكتور`).
const CONTACT_VERBS: &[(&str, Option<char>)] = &[
    ("اتصل", Some('ب')),
    ("اتصلي", Some('ب')),
    ("كلم", None),
    ("كلمي", None),
    ("كلملي", None),
    ("رن", None),
    ("رني", None),
    ("رنلي", None),
    ("ابعت", Some('ل')),
    ("ابعتي", Some('ل')),
    ("ابعتلي", Some('ل')),
    ("إبعت", Some('ل')),
    ("أرسل", Some('ل')),
    ("ارسل", Some('ل')),
    ("ضيف", None),
    ("احفظ", None),
];

const CONTACT_FILLERS: &[&str] = &[
    "على", "ب", "ل", "مع", "واتساب", "رسالة", "رساله", "مسج", "رقم", "نمرة", "تليفون",
];

const CONTACT_STOPS: &[&str] = &[
    "واتساب", "رسالة", "رساله", "مسج", "عشان", "علشان", "حالا", "بسرعة", "وقوله", "وقولها",
    "قوله", "قولها", "وقول", "يا",
];

const REMINDER_VERBS: &[&str] = &[
    "نبهني", "انبهني", "إنبهني", "نبهنى", "ذكرني", "ذكرنى", "فكرني", "فكرنى", "صحيني", "منبه",
    "المنبه",
];

const TIME_WORDS: &[&str] = &[
    "بكرة", "بكره", "غدا", "النهارده", "النهاردة", "اليوم", "امبارح", "إمبارح", "أمس", "دلوقتي",
    "دلوقت", "الآن", "الصبح", "الصباح", "الضهر", "الظهر", "العصر", "العصرية", "المغرب", "العشا",
    "العشية", "المساء", "بالليل", "بليل", "ليلا", "بعد", "قبل", "الساعة", "الساعه", "ساعة",
    "ساعه", "ساعتين", "دقيقة", "دقايق", "دقائق", "نص", "ونص", "ربع", "وربع", "إلا", "الا",
];

const MEDICATION_MARKERS: &[&str] = &[
    "دوا", "الدوا", "دواء", "الدواء", "علاج", "العلاج", "حباية", "الحباية", "برشام",
];

const MESSAGE_MARKERS: &[&str] = &[
    "وقوله", "وقولها", "وقولهم", "قوله", "قولها", "قولهم", "وقوليله", "وقوليلها", "وقول",
];

/// Normalises one utterance. Never fails; empty input gives an empty canonical form.
pub fn normalize(raw: &str) -> NormalizedUtterance {
    let canonical = canonicalize(raw);

    let mut slots = BTreeMap::new();
    slots.insert(SlotKey::Contact, extract_contact_name(raw));
    slots.insert(SlotKey::Time, extract_time_expression(raw));
    slots.insert(SlotKey::Medication, extract_medication(raw));
    slots.insert(SlotKey::Message, extract_message(raw));

    NormalizedUtterance::new(raw, canonical, slots)
}

/// Clean-up followed by every table in [`RULE_TABLES`].
pub fn canonicalize(text: &str) -> String {
    apply_tables(&clean(text), &RULE_TABLES)
}

/// Strips diacritics, tatweel and punctuation, lower-cases Latin text and
/// collapses whitespace.
pub fn clean(text: &str) -> String {
    let stripped = MARKS.replace_all(text, "");
    let spaced = PUNCTUATION.replace_all(&stripped, " ");
    spaced
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical form of a contact reference (`ماما` → `الأم`, `الدكتور أحمد` → `دكتور أحمد`).
pub fn normalize_contact_name(name: &str) -> String {
    apply_tables(&clean(name), &CONTACT_TABLES)
}

/// Contact named after a call/message verb, or an empty string.
pub fn extract_contact_name(text: &str) -> String {
    let cleaned = clean(text);
    let tokens = cleaned.split(' ').collect::<Vec<_>>();

    let Some((verb_idx, clitic)) = tokens.iter().enumerate().find_map(|(idx, token)| {
        CONTACT_VERBS
            .iter()
            .find(|(verb, _)| verb == token)
            .map(|(_, clitic)| (idx, *clitic))
    }) else {
        return String::new();
    };

    let mut rest = tokens[verb_idx + 1..]
        .iter()
        .skip_while(|token| CONTACT_FILLERS.contains(*token));

    let Some(first) = rest.next() else {
        return String::new();
    };

    let mut name = vec![strip_contact_clitic(first, clitic)];
    for token in rest.take(2) {
        if is_contact_stop(token) {
            break;
        }
        name.push((*token).to_string());
    }

    name.retain(|part| !part.is_empty());
    name.join(" ")
}

/// Time phrase following a reminder verb, or an empty string.
pub fn extract_time_expression(text: &str) -> String {
    let cleaned = clean(text);
    let tokens = cleaned.split(' ').collect::<Vec<_>>();

    let Some(verb_idx) = tokens
        .iter()
        .position(|token| REMINDER_VERBS.contains(token))
    else {
        return String::new();
    };

    tokens[verb_idx + 1..]
        .iter()
        .skip_while(|token| !is_time_token(token))
        .take_while(|token| is_time_token(token))
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Medication name following a medicine word (`دوا الضغط` → `الضغط`).
pub fn extract_medication(text: &str) -> String {
    let cleaned = clean(text);
    let tokens = cleaned.split(' ').collect::<Vec<_>>();

    let Some(marker_idx) = tokens.iter().position(|token| is_medication_marker(token)) else {
        return String::new();
    };

    tokens[marker_idx + 1..]
        .iter()
        .take_while(|token| !is_time_token(token) && !is_contact_stop(token))
        .take(2)
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Dictated message body following "tell him/her".
pub fn extract_message(text: &str) -> String {
    let cleaned = clean(text);
    let tokens = cleaned.split(' ').collect::<Vec<_>>();

    match tokens
        .iter()
        .position(|token| MESSAGE_MARKERS.contains(token))
    {
        Some(idx) => tokens[idx + 1..].join(" "),
        None => String::new(),
    }
}

fn apply_tables(text: &str, tables: &[RuleTable]) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut tokens = text.split(' ').map(str::to_string).collect::<Vec<_>>();
    for table in tables {
        for token in tokens.iter_mut() {
            if let Some(rewritten) = rewrite_token(token.as_str(), table.rules) {
                *token = rewritten;
            }
        }
    }
    tokens.join(" ")
}

fn rewrite_token(token: &str, rules: &[(&str, &str)]) -> Option<String> {
    if let Some(target) = lookup(token, rules) {
        return Some(target.to_string());
    }

    let mut chars = token.chars();
    let clitic = chars.next().filter(|ch| CLITICS.contains(ch))?;
    let stem = chars.as_str();
    if stem.chars().count() < 2 {
        return None;
    }
    lookup(stem, rules).map(|target| attach_clitic(clitic, target))
}

fn lookup<'a>(token: &str, rules: &[(&str, &'a str)]) -> Option<&'a str> {
    rules
        .iter()
        .find(|(source, _)| *source == token)
        .map(|(_, target)| *target)
}

/// `ل` + `ال` is written `لل`.
fn attach_clitic(clitic: char, word: &str) -> String {
    match (clitic, word.strip_prefix("ال")) {
        ('ل', Some(stem)) => format!("لل{stem}"),
        _ => format!("{clitic}{word}"),
    }
}

fn strip_contact_clitic(token: &str, clitic: Option<char>) -> String {
    if is_known_alias(token) {
        return token.to_string();
    }

    match clitic.and_then(|clitic| token.strip_prefix(clitic)) {
        Some(stem) if stem.chars().count() >= 2 => stem.to_string(),
        _ => token.to_string(),
    }
}

fn is_known_alias(token: &str) -> bool {
    CONTACT_TABLES
        .iter()
        .any(|table| lookup(token, table.rules).is_some())
}

fn is_contact_stop(token: &str) -> bool {
    CONTACT_STOPS.contains(&token) || TIME_WORDS.contains(&token)
}

fn is_time_token(token: &str) -> bool {
    TIME_WORDS.contains(&token) || (!token.is_empty() && token.chars().all(char::is_numeric))
}

fn is_medication_marker(token: &str) -> bool {
    if MEDICATION_MARKERS.contains(&token) {
        return true;
    }
    let mut chars = token.chars();
    matches!(chars.next(), Some('ب' | 'ل')) && MEDICATION_MARKERS.contains(&chars.as_str())
}
