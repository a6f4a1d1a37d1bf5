use std::collections::HashMap;

use crate::error::AlignmentError;
use crate::pipeline::traits::Tokenizer;
use crate::types::{
    AsrWord, ReferenceScript, ReferenceSentence, TokenId, Transcript, TranscriptToken,
};

/// Interns normalized words so that token comparison is an integer compare.
/// Transcript and reference must be built against the same vocabulary.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    ids: HashMap<String, TokenId>,
    words: Vec<String>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, normalized: &str) -> TokenId {
        if let Some(&id) = self.ids.get(normalized) {
            return id;
        }
        let id = self.words.len() as TokenId;
        self.words.push(normalized.to_string());
        self.ids.insert(normalized.to_string(), id);
        id
    }

    pub fn get(&self, normalized: &str) -> Option<TokenId> {
        self.ids.get(normalized).copied()
    }

    pub fn word(&self, id: TokenId) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Lowercases, folds common Latin accents and drops everything that is not
/// alphanumeric. Returns `None` when nothing is left (pure punctuation).
pub fn normalize_word_case_folded(word: &str) -> Option<String> {
    let normalized: String = word
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .filter(|c| c.is_alphanumeric())
        .collect();
    (!normalized.is_empty()).then_some(normalized)
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        _ => c,
    }
}

/// One transcript token per ASR word that survives normalization.
pub fn build_transcript(
    words: &[AsrWord],
    tokenizer: &dyn Tokenizer,
    vocab: &mut Vocabulary,
    total_duration: Option<f64>,
) -> Result<Transcript, AlignmentError> {
    let mut tokens = Vec::with_capacity(words.len());
    for word in words {
        let Some(normalized) = tokenizer.normalize(&word.text) else {
            continue;
        };
        tokens.push(TranscriptToken {
            id: vocab.intern(&normalized),
            text: word.text.clone(),
            start_time: word.start,
            end_time: word.end,
        });
    }
    Transcript::new(tokens, total_duration)
}

/// Sentence `i` of `sentences` gets index `i` and id `s{i}`. Sentences that
/// normalize to no tokens are kept (they will simply never match).
pub fn build_reference_script(
    sentences: &[&str],
    tokenizer: &dyn Tokenizer,
    vocab: &mut Vocabulary,
) -> Result<ReferenceScript, AlignmentError> {
    let sentences = sentences
        .iter()
        .enumerate()
        .map(|(index, text)| ReferenceSentence {
            id: format!("s{index}"),
            index,
            text: text.trim().to_string(),
            tokens: text
                .split_whitespace()
                .filter_map(|word| tokenizer.normalize(word))
                .map(|normalized| vocab.intern(&normalized))
                .collect(),
        })
        .collect();
    ReferenceScript::new(sentences)
}
