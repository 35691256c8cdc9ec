//! Pattern tables for Portuguese loan-domain phrasing
//!
//! Each rule is (field, certainty, pattern, producer). Rules are tried in
//! order and the first one producing a value wins its field, so the more
//! specific cue phrases come before the fallback heuristics.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::fmt;

use super::normalize::NormalizedText;
use crate::error::EngineError;
use crate::models::EntityField;
use crate::Result;

/// How much the user committed to a value when stating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Certainty {
    /// Matched a cue phrase ("meu benefício é ..."); the field is confirmed on merge.
    Explicit,
    /// Matched a fallback heuristic; the field stays tentative.
    Inferred,
}

/// Turns a match into a field value, or rejects it so the next match/rule is tried.
pub type Producer = fn(&NormalizedText<'_>, &Captures<'_>) -> Option<String>;

#[derive(Clone)]
pub struct ExtractionRule {
    pub field: EntityField,
    pub certainty: Certainty,
    pattern: Regex,
    produce: Producer,
}

impl ExtractionRule {
    /// `pattern` is matched against the folded (lowercase, accent-free) text.
    pub fn new(
        field: EntityField,
        certainty: Certainty,
        pattern: &str,
        produce: Producer,
    ) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| EngineError::ConfigError(format!("invalid extraction pattern: {}", e)))?;

        Ok(Self {
            field,
            certainty,
            pattern,
            produce,
        })
    }

    pub fn apply(&self, text: &NormalizedText<'_>) -> Option<String> {
        self.pattern
            .captures_iter(text.folded())
            .find_map(|caps| (self.produce)(text, &caps))
    }
}

impl fmt::Debug for ExtractionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionRule")
            .field("field", &self.field)
            .field("certainty", &self.certainty)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

fn rule(field: EntityField, certainty: Certainty, pattern: &str, produce: Producer) -> ExtractionRule {
    ExtractionRule::new(field, certainty, pattern, produce).expect("valid built-in extraction pattern")
}

/// Companion relations, folded spelling → reported category.
const COMPANION_CATEGORIES: &[(&str, &str)] = &[
    ("filho", "filho(a)"),
    ("filha", "filho(a)"),
    ("neto", "neto(a)"),
    ("neta", "neto(a)"),
    ("esposo", "cônjuge"),
    ("esposa", "cônjuge"),
    ("marido", "cônjuge"),
    ("mulher", "cônjuge"),
    ("sobrinho", "outro_familiar"),
    ("sobrinha", "outro_familiar"),
    ("irmao", "outro_familiar"),
    ("irma", "outro_familiar"),
    ("pai", "outro_familiar"),
    ("mae", "outro_familiar"),
    ("amigo", "amigo(a)"),
    ("amiga", "amigo(a)"),
    ("cuidador", "cuidador(a)"),
    ("cuidadora", "cuidador(a)"),
];

/// Words that end a name span ("meu nome é Ana quero ...").
const NAME_STOP_WORDS: &[&str] = &[
    "quero", "queria", "preciso", "gostaria", "tenho", "sou", "estou", "moro",
    "meu", "minha", "e", "mas", "porque", "aqui", "hoje",
];

/// Single words that follow "eu sou" without being a name.
const NOT_A_NAME: &[&str] = &[
    "aposentado", "aposentada", "pensionista", "cliente", "viuvo", "viuva",
    "eu", "o", "a", "da", "do", "de",
];

const PURPOSES: &str = "reforma|reformar|compra|comprar|pagamento|pagar|quitacao|quitar|ajuda|ajudar|viagem|viajar|saude|tratamento|presente|investimento|investir|emergencia|casa|carro|moto";

const RELATIONS: &str = "filho|filha|neto|neta|esposo|esposa|marido|mulher|sobrinho|sobrinha|irmao|irma|pai|mae|amigo|amiga|cuidador|cuidadora";

const NUMBER_WORDS: &[(&str, u64)] = &[
    ("dez", 10),
    ("vinte", 20),
    ("trinta", 30),
    ("quarenta", 40),
    ("cinquenta", 50),
    ("sessenta", 60),
    ("setenta", 70),
    ("oitenta", 80),
    ("noventa", 90),
    ("cem", 100),
];

/// Plausible loan window, in whole reais.
const MIN_AMOUNT: u64 = 1_000;
const MAX_AMOUNT: u64 = 200_000;

const CLAUSE_END: &str = r"\s*(?:[,.;!?]|$|\s(?:e|mas|porque)\b)";

lazy_static! {
    pub static ref DEFAULT_RULES: Vec<ExtractionRule> = {
        use Certainty::{Explicit, Inferred};
        use EntityField::*;

        vec![
            // ---- name ----
            rule(Name, Explicit, &format!(r"\bmeu nome e(?:h)?\s+([a-z][a-z '-]*?){}", CLAUSE_END), produce_name),
            rule(Name, Explicit, &format!(r"\bme chamo\s+([a-z][a-z '-]*?){}", CLAUSE_END), produce_name),
            rule(Name, Explicit, &format!(r"\baqui e(?:h)?\s+(?:o|a)\s+([a-z][a-z '-]*?){}", CLAUSE_END), produce_name),
            rule(Name, Explicit, &format!(r"\bsou (?:o|a)\s+([a-z][a-z '-]*?){}", CLAUSE_END), produce_capitalized_name),
            rule(Name, Explicit, &format!(r"\b(?:eu sou|quem fala e(?:h)?)\s+([a-z][a-z '-]*?){}", CLAUSE_END), produce_capitalized_name),

            // ---- preferred form of address ----
            rule(PreferredTreatment, Explicit, r"\b(?:nao precisa|sem|nada de)\s+(?:me chamar de|formalidade|me tratar como)\b", produce_informal),
            rule(PreferredTreatment, Explicit, r"\binformal\b", produce_informal),
            rule(PreferredTreatment, Explicit, &format!(r"\b(?:pode me chamar|me chame|me trate|pode me tratar|prefiro ser chamad[oa]|prefiro que me chame)\s+(?:de|como|pelo|por)\s+([a-z][a-z .]*?){}", CLAUSE_END), produce_treatment),

            // ---- benefit number ----
            rule(BenefitNumber, Explicit, r"\bbeneficio\s*(?:e\s+|eh\s+)?(?:o\s+)?(?:numero\s+)?[:#]?\s*(\d(?:[ .]?\d)+)", produce_benefit),
            rule(BenefitNumber, Explicit, r"\bnb\s*[:#]?\s*(\d(?:[ .]?\d)+)", produce_benefit),
            rule(BenefitNumber, Inferred, r"\b(\d{6,12})\b", produce_bare_benefit),

            // ---- requested amount ----
            rule(RequestedAmount, Explicit, r"r\$\s*\d{1,3}(?:\.?\d{3})*(?:,\d{1,2})?", produce_currency_amount),
            rule(RequestedAmount, Explicit, r"\b(\d{1,3}(?:\.?\d{3})*(?:,\d{1,2})?)\s*reais\b", produce_plain_amount),
            rule(RequestedAmount, Explicit, r"\b(?:emprestimo|valor|credito)\s+de\s+(\d{1,3}(?:\.?\d{3})*(?:,\d{1,2})?)\b", produce_plain_amount),
            rule(RequestedAmount, Inferred, r"\b(\d{1,3})\s*mil\b", produce_thousands),
            rule(RequestedAmount, Inferred, r"\b(dez|vinte|trinta|quarenta|cinquenta|sessenta|setenta|oitenta|noventa|cem)\s+mil\b", produce_word_thousands),

            // ---- purpose ----
            rule(Purpose, Explicit, &format!(r"\b(?:para|pra)\s+(?:(?:a|o|uma|um|minha|meu)\s+)?({})\b", PURPOSES), produce_purpose),
            rule(Purpose, Inferred, &format!(r"\b(?:emprestimo|dinheiro|credito)\s+(?:para|pra)\s+([a-z][a-z ]*?){}", CLAUSE_END), produce_free_purpose),
            rule(Purpose, Inferred, &format!(r"\b({})\b", PURPOSES), produce_purpose),

            // ---- companion ----
            rule(CompanionType, Explicit, &format!(r"\b(?:com|acompanhad[oa]\s+(?:de|d[oa]|pel[oa]))\s+(?:o\s+|a\s+)?m(?:eu|inha)\s+({})\b", RELATIONS), produce_companion),
            rule(CompanionType, Explicit, &format!(r"\bm(?:eu|inha)\s+({})\s+(?:esta|veio|ta)\s+(?:aqui\s+)?comigo\b", RELATIONS), produce_companion),
            rule(CompanionType, Explicit, r"\b(?:vim|estou|cheguei|to)\s+acompanhad[oa]\b", produce_generic_companion),
            rule(CompanionType, Explicit, r"\bnao\s+(?:estou|to|vim)\s+sozinh[oa]\b", produce_generic_companion),
            rule(CompanionType, Explicit, r"\b(?:tem|ha)\s+alguem\s+(?:aqui\s+)?comigo\b", produce_generic_companion),
            rule(CompanionType, Explicit, r"\b(?:trouxe|com)\s+(?:um|uma)\s+acompanhante\b", produce_generic_companion),
        ]
    };

    pub static ref EARLY_EXIT_PATTERNS: Vec<Regex> = [
        r"\bdesist(?:ir|o|iu|i|imos)?\b",
        r"\bcancel(?:ar|a|o|e)\b",
        r"\bnao\s+quero\s+(?:mais|nada)\b",
        r"\bnao\s+quero\s+(?:o\s+|esse\s+)?emprestimo\b",
        r"\bdeixa\s+pra\s+la\b",
        r"\bnao\s+tenho\s+interesse\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid early-exit pattern"))
    .collect();

    pub static ref AFFIRMATION_PATTERN: Regex = Regex::new(
        r"\b(?:sim|isso mesmo|isso ai|correto|confirmo|confirmado|exatamente|(?:esta|ta)\s+certo)\b"
    )
    .expect("valid affirmation pattern");

    static ref NEGATION_PATTERN: Regex = Regex::new(r"\b(?:nao|nem|nunca)\b")
        .expect("valid negation pattern");
}

/// An affirmation cue in some clause with no negation before it in that
/// clause. "Não, não está certo" and "isso não é correto" do not count.
pub fn is_affirmation(folded: &str) -> bool {
    folded.split([',', '.', ';', '!', '?']).any(|clause| {
        AFFIRMATION_PATTERN.find_iter(clause).any(|cue| {
            !NEGATION_PATTERN.is_match(&clause[..cue.start()])
        })
    })
}

//
// ================= Producers =================
//

fn group<'a>(text: &NormalizedText<'a>, caps: &Captures<'_>, index: usize) -> Option<&'a str> {
    caps.get(index)
        .map(|m| text.original_span(m.start(), m.end()).trim())
}

fn folded_group<'c>(caps: &Captures<'c>, index: usize) -> Option<&'c str> {
    caps.get(index).map(|m| m.as_str().trim())
}

fn produce_name(text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    clean_name(group(text, caps, 1)?)
}

/// "eu sou ..." is too loose to trust lowercase continuations.
fn produce_capitalized_name(text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let span = group(text, caps, 1)?;
    if !span.chars().next().is_some_and(char::is_uppercase) {
        return None;
    }
    clean_name(span)
}

fn clean_name(span: &str) -> Option<String> {
    let words: Vec<&str> = span
        .split_whitespace()
        .take_while(|word| !NAME_STOP_WORDS.contains(&NormalizedText::new(word).folded()))
        .take(5)
        .collect();

    if words.len() == 1 && NOT_A_NAME.contains(&NormalizedText::new(words[0]).folded()) {
        return None;
    }

    let name = words.join(" ");
    if name.chars().count() < 3 || name.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(name)
}

fn produce_informal(_text: &NormalizedText<'_>, _caps: &Captures<'_>) -> Option<String> {
    Some("você".to_string())
}

fn produce_treatment(text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let folded = folded_group(caps, 1)?.trim_end_matches('.');
    let treatment = match folded {
        "sr" | "senhor" | "seu" => "senhor".to_string(),
        "sra" | "senhora" | "dona" => "senhora".to_string(),
        "voce" | "vc" | "tu" => "você".to_string(),
        _ => group(text, caps, 1)?.trim_end_matches('.').to_string(),
    };
    (!treatment.is_empty()).then_some(treatment)
}

fn produce_benefit(_text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let digits: String = folded_group(caps, 1)?
        .chars()
        .filter(|c| !matches!(c, ' ' | '.'))
        .collect();

    let valid = (5..=12).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
    valid.then_some(digits)
}

/// A bare 6–12 digit run, unless it is written as money.
fn produce_bare_benefit(text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let m = caps.get(1)?;
    let before = text.folded()[..m.start()].trim_end();
    let after = text.folded()[m.end()..].trim_start();
    if before.ends_with("r$") || after.starts_with("reais") || after.starts_with(',') {
        return None;
    }
    Some(m.as_str().to_string())
}

fn produce_currency_amount(text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let m = caps.get(0)?;
    let verbatim = text.original_span(m.start(), m.end()).trim();
    plausible(whole_reais(verbatim)?).then(|| verbatim.to_string())
}

fn produce_plain_amount(text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let number = group(text, caps, 1)?;
    plausible(whole_reais(number)?).then(|| format!("R$ {}", number))
}

fn produce_thousands(_text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let value = folded_group(caps, 1)?.parse::<u64>().ok()? * 1_000;
    plausible(value).then(|| format_brl(value))
}

fn produce_word_thousands(_text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let word = folded_group(caps, 1)?;
    let (_, units) = NUMBER_WORDS.iter().find(|(w, _)| *w == word)?;
    let value = units * 1_000;
    plausible(value).then(|| format_brl(value))
}

fn produce_purpose(_text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    folded_group(caps, 1).map(str::to_string)
}

fn produce_free_purpose(text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let span = group(text, caps, 1)?;
    let words = span.split_whitespace().count();
    (1..=4).contains(&words).then(|| span.to_lowercase())
}

fn produce_companion(_text: &NormalizedText<'_>, caps: &Captures<'_>) -> Option<String> {
    let relation = folded_group(caps, 1)?;
    let category = COMPANION_CATEGORIES
        .iter()
        .find(|(word, _)| *word == relation)
        .map(|(_, category)| *category)
        .unwrap_or("outro_familiar");
    Some(category.to_string())
}

fn produce_generic_companion(_text: &NormalizedText<'_>, _caps: &Captures<'_>) -> Option<String> {
    Some("acompanhante".to_string())
}

//
// ================= Money helpers =================
//

/// Whole-reais part of a pt-BR amount ("R$ 10.000,50" → 10000).
pub fn whole_reais(amount: &str) -> Option<u64> {
    let integer_part = amount.split(',').next()?;
    let digits: String = integer_part.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn plausible(value: u64) -> bool {
    (MIN_AMOUNT..=MAX_AMOUNT).contains(&value)
}

/// pt-BR currency formatting with two decimals: 10000 → "R$ 10.000,00".
pub fn format_brl(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    format!("R$ {},00", grouped)
}
