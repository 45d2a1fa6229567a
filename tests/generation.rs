// Generation session lifecycle against a scripted in-process model

use std::path::Path;
use std::thread;
use std::time::Duration;

use docent::config::GenerationConfig;
use docent::core::ArtworkMetadata;
use docent::models::llm::{
	CancellationToken, CausalLm, FinishReason, GenerationSession, LmOptions, StreamEvent,
};
use docent::{Error, ErrorKind, Result};

const REPLY: &str = "Leonardo painted it around 1503.";
const KOREAN_REPLY: &str = "모나리자 is by Leonardo, é.";
const EOS: u32 = 0;
const VOCAB: usize = 256;
const MARKER: &[u8] = b"assistant";

/// Byte-level model that always answers the same reply after the last
/// "assistant" marker, one byte per token, decoding lossily like a BPE
/// byte-level decoder. The model file picks the script: "slow" never stops
/// and sleeps per step, "korean" answers with multi-byte characters.
struct ScriptedLm {
	slow: bool,
	reply: &'static str,
}

impl CausalLm for ScriptedLm {
	type Cache = Vec<u32>;

	fn load(path: &Path, _options: &LmOptions) -> Result<Self> {
		let contents = std::fs::read_to_string(path).map_err(|e| Error::ModelLoad {
			path: path.to_path_buf(),
			reason: e.to_string(),
		})?;
		let reply = if contents.contains("korean") { KOREAN_REPLY } else { REPLY };
		Ok(Self { slow: contents.contains("slow"), reply })
	}

	fn new_cache(&self) -> Vec<u32> {
		Vec::new()
	}

	fn cache_len(&self, cache: &Vec<u32>) -> usize {
		cache.len()
	}

	fn context_length(&self) -> usize {
		100_000
	}

	fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
		text.bytes()
			.map(|b| if b != 0 { Ok(b as u32) } else { Err(Error::Generation("nul byte".into())) })
			.collect()
	}

	fn detokenize(&self, tokens: &[u32]) -> Result<String> {
		let bytes: Vec<u8> = tokens.iter().map(|&t| t as u8).collect();
		Ok(String::from_utf8_lossy(&bytes).into_owned())
	}

	fn is_end_of_generation(&self, token: u32) -> bool {
		token == EOS
	}

	fn forward(&self, cache: &mut Vec<u32>, tokens: &[u32]) -> Result<Vec<f32>> {
		cache.extend_from_slice(tokens);
		if self.slow {
			thread::sleep(Duration::from_millis(20));
		}

		let bytes: Vec<u8> = cache.iter().map(|&t| t as u8).collect();
		let written = bytes
			.windows(MARKER.len())
			.rposition(|w| w == MARKER)
			.map(|i| bytes.len() - i - MARKER.len())
			.unwrap_or(0);

		let next = if self.slow {
			b'.' as u32
		} else {
			self.reply.as_bytes().get(written).map(|&b| b as u32).unwrap_or(EOS)
		};

		let mut logits = vec![0.0; VOCAB];
		logits[next as usize] = 100.0;
		Ok(logits)
	}
}

fn model_file(contents: &str) -> tempfile::NamedTempFile {
	let file = tempfile::NamedTempFile::new().unwrap();
	std::fs::write(file.path(), contents).unwrap();
	file
}

fn ready_session(config: GenerationConfig, contents: &str) -> (GenerationSession<ScriptedLm>, tempfile::NamedTempFile) {
	let file = model_file(contents);
	let mut session = GenerationSession::new(config);
	session.load_model(file.path(), &LmOptions::default()).unwrap();
	session.init_session().unwrap();
	session.decode_system_prompt().unwrap();
	(session, file)
}

fn kind<T>(result: Result<T>) -> ErrorKind {
	match result {
		Ok(_) => panic!("expected an error"),
		Err(e) => e.kind(),
	}
}

#[test]
fn streaming_concatenation_matches_blocking_output() {
	let (session, _file) = ready_session(GenerationConfig::default(), "fast");

	let mut streamed = String::new();
	let mut pieces = 0;
	let mut stats = None;
	for event in session.generate_streaming("Who painted this?", CancellationToken::new()).unwrap() {
		match event {
			StreamEvent::Token(piece) => {
				streamed.push_str(&piece);
				pieces += 1;
			}
			StreamEvent::Done(done) => stats = Some(done),
			StreamEvent::Failed(e) => panic!("generation failed: {}", e),
		}
	}
	let stats = stats.expect("no Done event");

	assert_eq!(streamed, REPLY);
	assert_eq!(pieces, REPLY.len());
	assert_eq!(stats.text, REPLY);
	assert_eq!(stats.tokens, REPLY.len());
	assert_eq!(stats.finish, FinishReason::EndOfSequence);

	// Wait for the streaming worker to release the session.
	while session.is_generating() {
		thread::yield_now();
	}
	let blocking = session.generate("Who painted this?").unwrap();
	assert_eq!(blocking.text, streamed);
}

#[test]
fn generate_before_init_is_a_state_error() {
	let mut session: GenerationSession<ScriptedLm> = GenerationSession::new(GenerationConfig::default());
	assert_eq!(kind(session.generate_streaming("hi", CancellationToken::new())), ErrorKind::SessionState);
	assert_eq!(kind(session.init_session()), ErrorKind::SessionState);

	let file = model_file("fast");
	session.load_model(file.path(), &LmOptions::default()).unwrap();
	assert_eq!(kind(session.generate("hi")), ErrorKind::SessionState);
	assert_eq!(kind(session.decode_system_prompt()), ErrorKind::SessionState);
}

#[test]
fn missing_model_file_fails_to_load() {
	let mut session: GenerationSession<ScriptedLm> = GenerationSession::new(GenerationConfig::default());
	let err = session.load_model(Path::new("/nonexistent/model.onnx"), &LmOptions::default()).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ModelLoad);
	assert!(!session.is_model_loaded());
}

#[test]
fn system_prompt_gate() {
	let file = model_file("fast");
	let mut session: GenerationSession<ScriptedLm> = GenerationSession::new(GenerationConfig::default());
	session.load_model(file.path(), &LmOptions::default()).unwrap();
	session.init_session().unwrap();

	assert!(!session.can_generate());
	assert_eq!(kind(session.generate("hi")), ErrorKind::SessionState);

	session.decode_system_prompt().unwrap();
	session.decode_system_prompt().unwrap();
	assert!(session.is_primed());
	assert!(session.can_generate());
}

#[test]
fn ungated_session_decodes_system_prompt_inline() {
	let config = GenerationConfig { require_system_prompt: false, ..GenerationConfig::default() };
	let file = model_file("fast");
	let mut session: GenerationSession<ScriptedLm> = GenerationSession::new(config);
	session.load_model(file.path(), &LmOptions::default()).unwrap();
	session.init_session().unwrap();

	assert_eq!(session.generate("hi").unwrap().text, REPLY);
}

#[test]
fn token_budget_stops_generation() {
	let config = GenerationConfig { max_new_tokens: 5, ..GenerationConfig::default() };
	let (session, _file) = ready_session(config, "fast");

	let stats = session.generate("hi").unwrap();
	assert_eq!(stats.finish, FinishReason::MaxTokens);
	assert_eq!(stats.text, &REPLY[..5]);
}

#[test]
fn init_close_lifecycle() {
	let (mut session, _file) = ready_session(GenerationConfig::default(), "fast");
	assert_eq!(kind(session.init_session()), ErrorKind::SessionState);

	session.close_session().unwrap();
	assert!(!session.is_initialized());
	assert_eq!(kind(session.close_session()), ErrorKind::SessionState);

	session.init_session().unwrap();
	session.decode_system_prompt().unwrap();
	assert_eq!(session.generate("again").unwrap().text, REPLY);
}

#[test]
fn closing_an_uninitialized_session_is_a_no_op() {
	let mut session: GenerationSession<ScriptedLm> = GenerationSession::new(GenerationConfig::default());
	session.close_session().unwrap();
	session.close_session().unwrap();
}

#[test]
fn changing_artwork_drops_cached_prompt() {
	let (mut session, _file) = ready_session(GenerationConfig::default(), "fast");
	assert!(session.is_primed());

	let artwork = ArtworkMetadata { title: "Mona Lisa".into(), ..Default::default() };
	session.set_artwork(Some(artwork.clone())).unwrap();
	assert!(!session.is_primed());

	session.decode_system_prompt().unwrap();
	session.set_artwork(Some(artwork)).unwrap();
	assert!(session.is_primed());
}

#[test]
fn second_generation_is_rejected_while_one_runs() {
	let config = GenerationConfig { max_new_tokens: 100_000, ..GenerationConfig::default() };
	let (session, _file) = ready_session(config, "slow");

	let cancel = CancellationToken::new();
	let first = session.generate_streaming("first", cancel.clone()).unwrap();
	assert!(session.is_generating());
	assert_eq!(kind(session.generate_streaming("second", CancellationToken::new())), ErrorKind::SessionState);
	assert_eq!(kind(session.generate("second")), ErrorKind::SessionState);

	cancel.cancel();
	let stats = first.collect_with_timeout(Duration::from_secs(10), |_| {}).unwrap();
	assert_eq!(stats.finish, FinishReason::Cancelled);
	assert!(!session.is_generating());
}

#[test]
fn timeout_cancels_the_worker() {
	let config = GenerationConfig { max_new_tokens: 100_000, ..GenerationConfig::default() };
	let (session, _file) = ready_session(config, "slow");

	let err = match session.generate_with_timeout("ramble", Duration::from_millis(200), |_| {}) {
		Ok(stats) => panic!("expected a timeout, finished with {:?}", stats.finish),
		Err(e) => e,
	};

	assert!(matches!(err, Error::GenerationTimeout(_)));
	assert_eq!(err.kind(), ErrorKind::GenerationTimeout);
	// The worker has been joined, so the session is free again.
	assert!(!session.is_generating());
	assert!(session.can_generate());
}

#[test]
fn same_seed_same_answer() {
	let config = GenerationConfig { temperature: 1.0, seed: 7, ..GenerationConfig::default() };
	let (session, _file) = ready_session(config, "fast");

	let a = session.generate("one").unwrap();
	let b = session.generate("one").unwrap();
	assert_eq!(a.text, b.text);
}

#[test]
fn multi_byte_characters_stream_whole() {
	let (session, _file) = ready_session(GenerationConfig::default(), "korean");

	let mut pieces = Vec::new();
	let stats = session
		.generate_with_timeout("누가 그렸나요?", Duration::from_secs(10), |piece| pieces.push(piece.to_string()))
		.unwrap();

	assert_eq!(stats.text, KOREAN_REPLY);
	assert_eq!(pieces.concat(), stats.text);
	assert!(pieces.iter().all(|p| !p.contains(char::REPLACEMENT_CHARACTER)));
	// One piece per character, not per byte.
	assert_eq!(pieces.len(), KOREAN_REPLY.chars().count());
}
