//! Reader for the `.inp` keyword subset used as mesh input.
//!
//! A deck is a flat list of cards: a `*KEYWORD, KEY=VALUE, FLAG` header
//! followed by comma-separated data lines. Lines starting with `**` are
//! comments. `*INCLUDE, INPUT=...` is expanded in place by
//! [`Deck::parse_file_with_includes`].

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deck {
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    /// Upper-cased keyword without the leading `*`
    pub keyword: String,
    pub parameters: Vec<Parameter>,
    pub data_lines: Vec<String>,
    /// 1-based line of the header
    pub line_start: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based; 0 when the error is not tied to a line
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl Card {
    /// Value of a header parameter, matched case-insensitively
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.key.eq_ignore_ascii_case(key))
            .and_then(|p| p.value.as_deref())
    }

    /// Whether the header carries `key`, with or without a value
    pub fn has_flag(&self, key: &str) -> bool {
        self.parameters.iter().any(|p| p.key.eq_ignore_ascii_case(key))
    }

    /// Data lines split into trimmed, non-empty fields, with the line offset
    /// inside the card. A trailing comma produces no field.
    pub fn data_fields(&self) -> impl Iterator<Item = (usize, Vec<&str>)> + '_ {
        self.data_lines.iter().enumerate().map(|(offset, line)| {
            let fields = line
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .collect();
            (offset, fields)
        })
    }
}

enum Line<'a> {
    Skip,
    Header(&'a str),
    /// `, KEY=VALUE` continuing the previous header
    Continuation(&'a str),
    Data(&'a str),
}

fn classify(raw: &str) -> Line<'_> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with("**") {
        Line::Skip
    } else if let Some(header) = line.strip_prefix('*') {
        Line::Header(header.trim())
    } else if line.starts_with(',') {
        Line::Continuation(line)
    } else {
        Line::Data(line)
    }
}

impl Deck {
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| ParseError::new(0, format!("failed to read {}: {e}", path.display())))?;
        Self::parse_str(&raw)
    }

    pub fn parse_str(raw: &str) -> Result<Self, ParseError> {
        let mut cards: Vec<Card> = Vec::new();
        // header text and line of the card being read, until its first data line
        let mut pending: Option<(String, usize)> = None;

        for (index, raw_line) in raw.lines().enumerate() {
            let number = index + 1;
            match classify(raw_line) {
                Line::Skip => {}
                Line::Header("") => {
                    if let Some((header, line)) = pending.take() {
                        cards.push(start_card(&header, line)?);
                    }
                }
                Line::Header(header) => {
                    if let Some((previous, line)) = pending.replace((header.to_string(), number)) {
                        cards.push(start_card(&previous, line)?);
                    }
                }
                Line::Continuation(rest) => match pending.as_mut() {
                    Some((header, _)) => header.push_str(rest),
                    None if cards.is_empty() => {
                        return Err(ParseError::new(number, "expected card starting with '*'"));
                    }
                    None => push_data(&mut cards, rest),
                },
                Line::Data(data) => {
                    if let Some((header, line)) = pending.take() {
                        cards.push(start_card(&header, line)?);
                    }
                    if cards.is_empty() {
                        return Err(ParseError::new(number, "expected card starting with '*'"));
                    }
                    push_data(&mut cards, data);
                }
            }
        }
        if let Some((header, line)) = pending {
            cards.push(start_card(&header, line)?);
        }
        Ok(Deck { cards })
    }

    /// Parse `path` and expand every `*INCLUDE` relative to the including file
    pub fn parse_file_with_includes(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let mut expander = IncludeExpander::default();
        let cards = expander.expand(path.as_ref())?;
        Ok(Deck { cards })
    }

    /// All cards with the given keyword, in deck order
    pub fn cards_named<'a>(&'a self, keyword: &'a str) -> impl Iterator<Item = &'a Card> + 'a {
        self.cards
            .iter()
            .filter(move |c| c.keyword.eq_ignore_ascii_case(keyword))
    }
}

fn push_data(cards: &mut [Card], data: &str) {
    if let Some(card) = cards.last_mut() {
        card.data_lines.push(data.to_string());
    }
}

fn start_card(header: &str, line: usize) -> Result<Card, ParseError> {
    let mut fields = split_outside_quotes(header).into_iter();
    let keyword = fields.next().unwrap_or_default().to_ascii_uppercase();
    if keyword.is_empty() {
        return Err(ParseError::new(line, "empty card keyword"));
    }
    let parameters = fields
        .filter(|f| !f.is_empty())
        .map(|field| match field.split_once('=') {
            Some((key, value)) => Parameter {
                key: key.trim().to_ascii_uppercase(),
                value: Some(unquote(value.trim()).to_string()),
            },
            None => Parameter {
                key: field.to_ascii_uppercase(),
                value: None,
            },
        })
        .collect();
    Ok(Card {
        keyword,
        parameters,
        data_lines: Vec::new(),
        line_start: line,
    })
}

fn unquote(value: &str) -> &str {
    value.trim_matches('"').trim_matches('\'')
}

/// Comma-separated header fields; commas inside quotes do not split
fn split_outside_quotes(header: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut quote: Option<char> = None;
    for ch in header.chars() {
        match (ch, quote) {
            ('"' | '\'', None) => quote = Some(ch),
            (c, Some(open)) if c == open => quote = None,
            (',', None) => {
                fields.push(String::new());
                continue;
            }
            _ => {}
        }
        if let Some(current) = fields.last_mut() {
            current.push(ch);
        }
    }
    fields.iter().map(|f| f.trim().to_string()).collect()
}

/// Tracks the chain of files being expanded to reject include cycles
#[derive(Default)]
struct IncludeExpander {
    chain: Vec<PathBuf>,
}

impl IncludeExpander {
    fn expand(&mut self, path: &Path) -> Result<Vec<Card>, ParseError> {
        let key = canonical(path);
        if self.chain.contains(&key) {
            let mut names: Vec<String> = self.chain.iter().map(|p| p.display().to_string()).collect();
            names.push(key.display().to_string());
            return Err(ParseError::new(
                0,
                format!("include cycle detected: {}", names.join(" -> ")),
            ));
        }

        self.chain.push(key);
        let result = self.expand_cards(path);
        self.chain.pop();
        result
    }

    fn expand_cards(&mut self, path: &Path) -> Result<Vec<Card>, ParseError> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut out = Vec::new();
        for card in Deck::parse_file(path)?.cards {
            if card.keyword != "INCLUDE" {
                out.push(card);
                continue;
            }
            let input = card.parameter("INPUT").ok_or_else(|| {
                ParseError::new(card.line_start, "missing INPUT parameter in *INCLUDE card")
            })?;
            let target = Path::new(input.trim());
            let target = if target.is_absolute() {
                target.to_path_buf()
            } else {
                base.join(target)
            };
            let included = self.expand(&target).map_err(|err| {
                ParseError::new(
                    err.line,
                    format!("{} (while expanding include {})", err.message, target.display()),
                )
            })?;
            out.extend(included);
        }
        Ok(out)
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLATE: &str = "
** mounting plate, two bricks
*NODE, NSET=NALL
1, 0.0, 0.0, 0.0
2, 0.1, 0.0, 0.0
*ELEMENT, TYPE=C3D8, ELSET=PLATE
1, 1, 2, 3, 4, 5, 6, 7, 8
*NSET, NSET=WALL
1, 2,
*ELSET, ELSET=\"HOLE, LEFT\"
1
";

    #[test]
    fn reads_keywords_parameters_and_data() {
        let deck = Deck::parse_str(PLATE).expect("deck should parse");
        let keywords: Vec<&str> = deck.cards.iter().map(|c| c.keyword.as_str()).collect();
        assert_eq!(keywords, ["NODE", "ELEMENT", "NSET", "ELSET"]);
        assert_eq!(deck.cards[0].parameter("nset"), Some("NALL"));
        assert_eq!(deck.cards[0].data_lines.len(), 2);
        assert_eq!(deck.cards[1].line_start, 6);
        assert_eq!(deck.cards[3].parameter("ELSET"), Some("HOLE, LEFT"));
    }

    #[test]
    fn trailing_comma_yields_no_field() {
        let deck = Deck::parse_str(PLATE).expect("deck should parse");
        let wall = deck.cards_named("Nset").next().expect("NSET card");
        assert_eq!(wall.data_fields().collect::<Vec<_>>(), [(0, vec!["1", "2"])]);
    }

    #[test]
    fn header_continuation_adds_flags() {
        let deck = Deck::parse_str("*NSET, NSET=TOP\n, GENERATE\n10, 20, 2\n").expect("deck should parse");
        assert_eq!(deck.cards.len(), 1);
        assert!(deck.cards[0].has_flag("generate"));
        assert_eq!(deck.cards[0].data_lines, ["10, 20, 2"]);
    }

    #[test]
    fn data_before_any_card_is_rejected() {
        let err = Deck::parse_str("** header\n4, 5\n*NODE\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.to_string().starts_with("line 2:"));
    }

    #[test]
    fn includes_expand_in_place() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let main = tmp.path().join("mount.inp");
        fs::write(&main, "*NODE\n1, 0, 0, 0\n*INCLUDE, INPUT=sets/regions.inc\n*NSET, NSET=LOAD\n1\n")
            .expect("write main");
        fs::create_dir(tmp.path().join("sets")).expect("mkdir");
        fs::write(tmp.path().join("sets/regions.inc"), "*INCLUDE, INPUT='solid.inc'\n*ELSET, ELSET=VOID\n2\n")
            .expect("write regions");
        fs::write(tmp.path().join("sets/solid.inc"), "*ELSET, ELSET=SOLID\n1\n").expect("write solid");

        let deck = Deck::parse_file_with_includes(&main).expect("includes should expand");
        let sets: Vec<Option<&str>> = deck
            .cards
            .iter()
            .map(|c| c.parameter("ELSET").or(c.parameter("NSET")))
            .collect();
        assert_eq!(sets, [None, Some("SOLID"), Some("VOID"), Some("LOAD")]);
    }

    #[test]
    fn include_cycle_is_reported() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let a = tmp.path().join("a.inp");
        fs::write(&a, "*INCLUDE, INPUT=b.inp\n").expect("write a");
        fs::write(tmp.path().join("b.inp"), "*INCLUDE, INPUT=a.inp\n").expect("write b");

        let err = Deck::parse_file_with_includes(&a).unwrap_err();
        assert!(err.message.contains("include cycle"), "{}", err.message);
    }

    #[test]
    fn include_without_input_is_rejected() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let main = tmp.path().join("main.inp");
        fs::write(&main, "*NODE\n1, 0, 0, 0\n*INCLUDE\n").expect("write main");

        let err = Deck::parse_file_with_includes(&main).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("missing INPUT parameter"));
    }
}
