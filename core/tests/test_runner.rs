//! Query runner: encoder/decoder hand-over, stop conditions, length cap
//! and out-of-alphabet handling.

mod stub_cells;

use algebrain_core::block::DualPhaseBlock;
use algebrain_core::cell::StepError;
use algebrain_core::codec::SymbolCodec;
use algebrain_core::config::BlockConfig;
use algebrain_core::runner::{self, Runner};
use stub_cells::{one_hot, StubCell};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const T: usize = 0;

fn sym(c: char) -> usize {
    c as usize
}

/// Reader emits junk ('?'); writer follows `script` then repeats `tail`.
fn scripted_block(script: &[usize], tail: char) -> DualPhaseBlock<StubCell> {
    let codec = SymbolCodec::default();
    DualPhaseBlock::new(
        StubCell::new(codec.char_count(), sym('?')),
        StubCell::scripted(codec.char_count(), sym(tail), script),
        codec,
    )
}

// ── "5+3" → "8" ─────────────────────────────────────────────────────────

#[test]
fn test_five_plus_three() {
    init_logger();
    let block = scripted_block(&[sym('8'), T], 'x');
    let out = block.query("5+3").unwrap();
    assert_eq!(out, "8");

    // Three query symbols plus one terminator go to the reader.
    assert_eq!(block.reader().seen(), vec![sym('5'), sym('+'), sym('3'), T]);
    // The decoder starts from the terminator, then is fed its own output.
    assert_eq!(block.writer().seen(), vec![T, sym('8')]);
}

#[test]
fn test_immediate_terminator_gives_empty_response() {
    let block = scripted_block(&[T], 'x');
    assert_eq!(block.query("1").unwrap(), "");
    assert_eq!(block.writer().calls(), 1);
}

#[test]
fn test_empty_query_still_hands_over() {
    let block = scripted_block(&[sym('k'), T], 'x');
    assert_eq!(block.query("").unwrap(), "k");
    assert_eq!(block.reader().seen(), vec![T]);
}

// ── Length cap ──────────────────────────────────────────────────────────

#[test]
fn test_cap_counts_symbols() {
    init_logger();
    let block = scripted_block(&[], 'x');
    let out = block.query_with_limit("ab", 5).unwrap();
    assert_eq!(out, "xxxxx");
    // Five emitted plus the decode that hit the cap.
    assert_eq!(block.writer().calls(), 6);
}

#[test]
fn test_zero_cap() {
    let block = scripted_block(&[], 'x');
    assert_eq!(block.query_with_limit("ab", 0).unwrap(), "");
}

#[test]
fn test_block_query_uses_configured_cap() {
    let block = scripted_block(&[], 'y').with_max_response_len(3);
    assert_eq!(block.query("q").unwrap(), "yyy");
}

// ── Out-of-alphabet query characters ────────────────────────────────────

#[test]
fn test_out_of_range_characters_skipped() {
    init_logger();
    let block = scripted_block(&[T], 'x');
    block.query("a\u{e9}b\u{1F600}").unwrap();
    assert_eq!(block.reader().seen(), vec![sym('a'), sym('b'), T]);
}

// ── Runner ──────────────────────────────────────────────────────────────

#[test]
fn test_runner_carries_state() {
    let cell = StubCell::new(4, 1);
    let mut r = Runner::new(&cell);
    assert!(r.state().is_none());
    let y = r.step_time(one_hot(4, 2)).unwrap();
    assert_eq!(y, one_hot(4, 1));
    r.step_time(one_hot(4, 3)).unwrap();
    assert_eq!(r.state(), Some(&2));
    assert_eq!(r.steps(), 2);
    r.reset();
    assert!(r.state().is_none());
    r.step_time(one_hot(4, 3)).unwrap();
    assert_eq!(r.state(), Some(&1));
}

#[test]
fn test_failed_step_keeps_runner_state() {
    let cfg = BlockConfig::test_config();
    let block = DualPhaseBlock::from_config(&cfg);
    let codec = cfg.codec();
    let mut r = Runner::new(&block);
    r.step_time(codec.encode(3).unwrap()).unwrap();
    let before = r.state().cloned();
    assert!(before.is_some());

    let err = r.step_time(vec![1.0; 3]).unwrap_err();
    assert!(matches!(err, StepError::InvalidArgument(_)));
    assert_eq!(r.state().cloned(), before);
    assert_eq!(r.steps(), 1);

    // The next good step continues from the kept state.
    let mut fresh = Runner::new(&block);
    fresh.step_time(codec.encode(3).unwrap()).unwrap();
    let a = r.step_time(codec.encode(4).unwrap()).unwrap();
    let b = fresh.step_time(codec.encode(4).unwrap()).unwrap();
    assert_eq!(a, b);
    assert_eq!(r.steps(), 2);
}

#[test]
fn test_runner_query_on_plain_cell() {
    // A cell that always emits the terminator answers with nothing.
    let codec = SymbolCodec::new(4, 0);
    let cell = StubCell::new(4, 0);
    assert_eq!(runner::query(&cell, &codec, "\u{1}\u{2}", 10).unwrap(), "");
    assert_eq!(cell.calls(), 4);
}

#[test]
fn test_tanh_block_query_respects_cap() {
    let cfg = BlockConfig::test_config();
    let block = DualPhaseBlock::from_config(&cfg);
    let out = block.query("\u{1}\u{2}\u{3}").unwrap();
    assert!(out.chars().count() <= cfg.max_response_len);
    assert!(out.chars().all(|c| (c as usize) < cfg.char_count && c as usize != cfg.terminator));
}
