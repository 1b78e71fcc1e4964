//! Corpus parsing and fact verbalization tests

use anyhow::Result;
use facttune::dataset::{load_facts, Fact, FactDataset};
use facttune::model::TextTokenizer;
use facttune::provider::WordTokenizer;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_article_rule_for_all_vowels() -> Result<()> {
    for (subject, expected) in [
        ("apple", "an apple is a thing"),
        ("egg", "an egg is a thing"),
        ("igloo", "an igloo is a thing"),
        ("orange", "an orange is a thing"),
        ("umbrella", "an umbrella is a thing"),
        ("fruit", "a fruit is a thing"),
        ("banana", "a banana is a thing"),
    ] {
        let fact = Fact::parse(&format!(r#"["{subject}", "thing"]"#))?;
        assert_eq!(fact.verbalize(), expected);
    }
    Ok(())
}

#[test]
fn test_apple_fruit_end_to_end() -> Result<()> {
    // "an apple is a fruit" with appearance-order word ids starting at 0
    let fact = Fact::parse(r#"["apple", "fruit"]"#)?;
    let sentence = fact.verbalize();
    assert_eq!(sentence, "an apple is a fruit");

    let tokenizer = WordTokenizer::fit(&[sentence.as_str()]);
    let dataset = FactDataset::from_facts(&[fact], &tokenizer);
    let example = dataset.get(0).expect("one example");

    assert_eq!(example.input_ids, vec![0, 1, 2, 3, 4]);
    assert_eq!(example.label_ids, example.input_ids);
    assert_eq!(example.attention_mask, vec![1, 1, 1, 1, 1]);
    Ok(())
}

#[test]
fn test_corpus_file_loading_skips_blank_lines() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, r#"["apple", "fruit"]"#)?;
    writeln!(file)?;
    writeln!(file, r#"["dog", "animal"]"#)?;
    file.flush()?;

    let facts = load_facts(file.path())?;
    assert_eq!(facts.len(), 2);
    assert_eq!(facts[1].subject, "dog");
    Ok(())
}

#[test]
fn test_malformed_line_rejected_with_line_number() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, r#"["apple", "fruit"]"#)?;
    writeln!(file, r#"["apple"]"#)?;
    file.flush()?;

    let err = load_facts(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("line 2"), "got: {err:#}");
    Ok(())
}

#[test]
fn test_empty_phrase_rejected_at_construction() {
    assert!(Fact::parse(r#"["", "fruit"]"#).is_err());
    assert!(Fact::parse(r#"["apple", ""]"#).is_err());
}

#[test]
fn test_single_character_phrases_pass_the_vowel_check() -> Result<()> {
    let fact = Fact::parse(r#"["a", "b"]"#)?;
    assert_eq!(fact.verbalize(), "an a is a b");
    Ok(())
}

#[test]
fn test_tokenizer_roundtrip_through_directory() -> Result<()> {
    let tokenizer = WordTokenizer::fit(&["an apple is a fruit"]);
    let dir = tempfile::tempdir()?;
    tokenizer.save_pretrained(dir.path())?;

    let reloaded = WordTokenizer::from_directory(dir.path())?;
    assert_eq!(
        reloaded.tokenize("an apple is a fruit"),
        tokenizer.tokenize("an apple is a fruit")
    );
    assert_eq!(reloaded.pad_id(), tokenizer.pad_id());
    Ok(())
}
