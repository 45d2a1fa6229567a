//! Generation session lifecycle, system-prompt caching and token streaming

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::backend::{CausalLm, LmOptions};
use super::prompt::{system_prompt, user_prompt};
use super::sampler::Sampler;
use crate::config::GenerationConfig;
use crate::core::ArtworkMetadata;
use crate::error::{Error, Result};
use crate::ui;

/// Cooperative stop signal, checked between decoding steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
	EndOfSequence,
	MaxTokens,
	ContextFull,
	Cancelled,
}

#[derive(Debug, Clone)]
pub struct GenerationStats {
	pub tokens: usize,
	pub elapsed: Duration,
	pub finish: FinishReason,
	pub text: String,
}

impl GenerationStats {
	pub fn tokens_per_second(&self) -> f64 {
		let secs = self.elapsed.as_secs_f64();
		if secs > 0.0 {
			self.tokens as f64 / secs
		} else {
			0.0
		}
	}
}

#[derive(Debug)]
pub enum StreamEvent {
	Token(String),
	Done(GenerationStats),
	Failed(Error),
}

/// Consumer side of a running generation.
///
/// Dropping the stream cancels the worker.
pub struct TokenStream {
	events: Receiver<StreamEvent>,
	cancel: CancellationToken,
	worker: Option<JoinHandle<()>>,
}

impl TokenStream {
	pub fn cancel_token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Feed every token to `on_token` until the worker finishes or `timeout`
	/// elapses. On timeout the worker is cancelled and joined before returning
	/// [`Error::GenerationTimeout`].
	pub fn collect_with_timeout(mut self, timeout: Duration, mut on_token: impl FnMut(&str)) -> Result<GenerationStats> {
		let deadline = Instant::now() + timeout;

		loop {
			match self.events.recv_deadline(deadline) {
				Ok(StreamEvent::Token(piece)) => on_token(&piece),
				Ok(StreamEvent::Done(stats)) => {
					self.join();
					return Ok(stats);
				}
				Ok(StreamEvent::Failed(e)) => {
					self.join();
					return Err(e);
				}
				Err(RecvTimeoutError::Timeout) => {
					self.cancel.cancel();
					// Unblock a worker stuck on a full channel before joining it.
					drop(std::mem::replace(&mut self.events, crossbeam_channel::never()));
					self.join();
					return Err(Error::GenerationTimeout(timeout));
				}
				Err(RecvTimeoutError::Disconnected) => {
					self.join();
					return Err(Error::Generation("generation worker exited without a result".to_string()));
				}
			}
		}
	}

	fn join(&mut self) {
		if let Some(handle) = self.worker.take() {
			if handle.join().is_err() {
				ui::error("Generation worker panicked");
			}
		}
	}
}

impl Iterator for TokenStream {
	type Item = StreamEvent;

	fn next(&mut self) -> Option<StreamEvent> {
		self.events.recv().ok()
	}
}

impl Drop for TokenStream {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

/// Decode state owned by an initialized session.
struct Context<C> {
	sampler: Sampler,
	/// Cache right after the system prompt.
	prefix: Option<C>,
}

/// Clears the in-flight flag however the generation ends.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

/// One conversation with a loaded model.
///
/// Required order: [`load_model`](Self::load_model) →
/// [`init_session`](Self::init_session) → optionally
/// [`decode_system_prompt`](Self::decode_system_prompt) →
/// [`generate_streaming`](Self::generate_streaming) (any number of times) →
/// [`close_session`](Self::close_session). Out-of-order calls fail with
/// [`Error::SessionState`]; at most one generation runs at a time.
pub struct GenerationSession<M: CausalLm> {
	config: GenerationConfig,
	model: Option<Arc<M>>,
	context: Option<Arc<Mutex<Context<M::Cache>>>>,
	artwork: Option<ArtworkMetadata>,
	primed: bool,
	closed: bool,
	busy: Arc<AtomicBool>,
}

impl<M: CausalLm> GenerationSession<M> {
	pub fn new(config: GenerationConfig) -> Self {
		Self {
			config,
			model: None,
			context: None,
			artwork: None,
			primed: false,
			closed: false,
			busy: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn config(&self) -> &GenerationConfig {
		&self.config
	}

	pub fn is_model_loaded(&self) -> bool {
		self.model.is_some()
	}

	pub fn is_initialized(&self) -> bool {
		self.context.is_some()
	}

	/// System prompt decoded and cached.
	pub fn is_primed(&self) -> bool {
		self.primed
	}

	pub fn is_generating(&self) -> bool {
		self.busy.load(Ordering::SeqCst)
	}

	/// Whether a generate call would currently be accepted.
	pub fn can_generate(&self) -> bool {
		self.is_initialized() && !self.is_generating() && (self.primed || !self.config.require_system_prompt)
	}

	pub fn load_model(&mut self, path: &Path, options: &LmOptions) -> Result<()> {
		if self.model.is_some() {
			return Err(Error::SessionState("model already loaded".to_string()));
		}
		let start = Instant::now();
		let model = M::load(path, options)?;
		ui::debug(&format!("Language model loaded in {:.2}s", start.elapsed().as_secs_f32()));
		self.model = Some(Arc::new(model));
		Ok(())
	}

	/// Allocate the decode context and sampler.
	pub fn init_session(&mut self) -> Result<()> {
		if self.model.is_none() {
			return Err(Error::SessionState("init_session called before load_model".to_string()));
		}
		if self.context.is_some() {
			return Err(Error::SessionState("session already initialized".to_string()));
		}

		self.context = Some(Arc::new(Mutex::new(Context {
			sampler: Sampler::new(&self.config),
			prefix: None,
		})));
		self.primed = false;
		self.closed = false;
		Ok(())
	}

	/// Ground the conversation in an artwork. Drops any cached system prompt.
	pub fn set_artwork(&mut self, artwork: Option<ArtworkMetadata>) -> Result<()> {
		self.ensure_idle()?;
		if self.artwork == artwork {
			return Ok(());
		}
		self.artwork = artwork;

		if self.primed {
			if let Some(context) = &self.context {
				lock(context)?.prefix = None;
			}
			self.primed = false;
			ui::debug("Artwork changed, system prompt cache cleared");
		}
		Ok(())
	}

	/// Run the system prompt through the model once and keep the resulting cache.
	pub fn decode_system_prompt(&mut self) -> Result<()> {
		let (model, context) = self.parts("decode_system_prompt")?;
		self.ensure_idle()?;
		if self.primed {
			ui::debug("System prompt already cached");
			return Ok(());
		}

		let start = Instant::now();
		let tokens = model.tokenize(&system_prompt(self.artwork.as_ref()))?;
		if tokens.len() >= model.context_length() {
			return Err(Error::Generation(format!(
				"system prompt is {} tokens, context holds {}",
				tokens.len(),
				model.context_length()
			)));
		}

		let mut cache = model.new_cache();
		model.forward(&mut cache, &tokens)?;
		lock(&context)?.prefix = Some(cache);
		self.primed = true;

		ui::debug(&format!(
			"System prompt cached: {} tokens in {:.2}s",
			tokens.len(),
			start.elapsed().as_secs_f32()
		));
		Ok(())
	}

	/// Start generating on a background worker. Tokens arrive on the returned
	/// stream as they are sampled; `cancel` stops the worker between steps.
	pub fn generate_streaming(&self, prompt: &str, cancel: CancellationToken) -> Result<TokenStream> {
		let (model, context) = self.parts("generate_streaming")?;
		let guard = self.acquire()?;

		let (tx, rx) = bounded(self.config.token_channel_capacity.max(1));
		let job = Job {
			prompt: prompt.to_string(),
			system: self.inline_system_prompt(),
			max_new_tokens: self.config.max_new_tokens,
			cancel: cancel.clone(),
		};

		let worker = std::thread::Builder::new()
			.name("docent-generate".to_string())
			.spawn(move || {
				let _guard = guard;
				stream_worker(&*model, &context, job, tx);
			})?;

		Ok(TokenStream { events: rx, cancel, worker: Some(worker) })
	}

	/// Streaming generation bounded by `timeout`; see [`TokenStream::collect_with_timeout`].
	pub fn generate_with_timeout(
		&self,
		prompt: &str,
		timeout: Duration,
		on_token: impl FnMut(&str),
	) -> Result<GenerationStats> {
		self.generate_streaming(prompt, CancellationToken::new())?
			.collect_with_timeout(timeout, on_token)
	}

	/// Blocking, non-streaming generation on the calling thread.
	pub fn generate(&self, prompt: &str) -> Result<GenerationStats> {
		let (model, context) = self.parts("generate")?;
		let _guard = self.acquire()?;

		let job = Job {
			prompt: prompt.to_string(),
			system: self.inline_system_prompt(),
			max_new_tokens: self.config.max_new_tokens,
			cancel: CancellationToken::new(),
		};
		let mut ctx = lock(&context)?;
		run_generation(&*model, &mut *ctx, &job, |_| true)
	}

	/// Release the context and sampler. A no-op on a session that was never
	/// initialized; closing an already closed session is an error.
	pub fn close_session(&mut self) -> Result<()> {
		if self.context.is_none() {
			if self.closed {
				return Err(Error::SessionState("session already closed".to_string()));
			}
			return Ok(());
		}
		self.ensure_idle()?;

		self.context = None;
		self.primed = false;
		self.closed = true;
		ui::debug("Generation session closed");
		Ok(())
	}

	fn parts(&self, op: &str) -> Result<(Arc<M>, Arc<Mutex<Context<M::Cache>>>)> {
		let model = self
			.model
			.clone()
			.ok_or_else(|| Error::SessionState(format!("{} called before load_model", op)))?;
		let context = self
			.context
			.clone()
			.ok_or_else(|| Error::SessionState(format!("{} called before init_session", op)))?;
		Ok((model, context))
	}

	fn ensure_idle(&self) -> Result<()> {
		if self.is_generating() {
			return Err(Error::SessionState("a generation is in progress".to_string()));
		}
		Ok(())
	}

	fn acquire(&self) -> Result<BusyGuard> {
		if self.config.require_system_prompt && !self.primed {
			return Err(Error::SessionState(
				"system prompt must be decoded before generating".to_string(),
			));
		}
		self.busy
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.map_err(|_| Error::SessionState("a generation is already in progress".to_string()))?;
		Ok(BusyGuard(self.busy.clone()))
	}

	/// System prompt to decode per call when nothing is cached.
	fn inline_system_prompt(&self) -> Option<String> {
		if self.primed {
			None
		} else {
			Some(system_prompt(self.artwork.as_ref()))
		}
	}
}

struct Job {
	prompt: String,
	system: Option<String>,
	max_new_tokens: usize,
	cancel: CancellationToken,
}

fn lock<C>(context: &Arc<Mutex<Context<C>>>) -> Result<std::sync::MutexGuard<'_, Context<C>>> {
	context
		.lock()
		.map_err(|_| Error::Generation("decode context poisoned by an earlier panic".to_string()))
}

fn stream_worker<M: CausalLm>(model: &M, context: &Arc<Mutex<Context<M::Cache>>>, job: Job, tx: Sender<StreamEvent>) {
	let result = lock(context).and_then(|mut ctx| {
		run_generation(model, &mut *ctx, &job, |piece| tx.send(StreamEvent::Token(piece.to_string())).is_ok())
	});

	let event = match result {
		Ok(stats) => StreamEvent::Done(stats),
		Err(e) => StreamEvent::Failed(e),
	};
	// The consumer may already be gone after a timeout.
	let _ = tx.send(event);
}

/// Autoregressive decode loop shared by the streaming and blocking paths.
///
/// `emit` receives each new piece of text; returning `false` stops decoding.
fn run_generation<M: CausalLm>(
	model: &M,
	ctx: &mut Context<M::Cache>,
	job: &Job,
	mut emit: impl FnMut(&str) -> bool,
) -> Result<GenerationStats> {
	let start = Instant::now();
	ctx.sampler.reset();

	let mut cache = match (&ctx.prefix, &job.system) {
		(Some(prefix), _) => prefix.clone(),
		(None, Some(system)) => {
			let mut cache = model.new_cache();
			let tokens = model.tokenize(system)?;
			if !tokens.is_empty() {
				model.forward(&mut cache, &tokens)?;
			}
			cache
		}
		(None, None) => model.new_cache(),
	};

	let prompt_tokens = model.tokenize(&user_prompt(&job.prompt))?;
	if prompt_tokens.is_empty() {
		return Err(Error::Generation("prompt produced no tokens".to_string()));
	}
	if model.cache_len(&cache) + prompt_tokens.len() >= model.context_length() {
		return Err(Error::Generation("prompt does not fit in the context window".to_string()));
	}

	let mut logits = model.forward(&mut cache, &prompt_tokens)?;
	let mut generated: Vec<u32> = Vec::new();
	let mut emitted = String::new();

	let finish = loop {
		if job.cancel.is_cancelled() {
			break FinishReason::Cancelled;
		}
		if generated.len() >= job.max_new_tokens {
			break FinishReason::MaxTokens;
		}

		let token = ctx.sampler.sample(&logits)?;
		if model.is_end_of_generation(token) {
			break FinishReason::EndOfSequence;
		}
		generated.push(token);

		// Re-decode the whole reply so multi-token characters come out whole.
		// A trailing U+FFFD is a character still waiting for its next bytes.
		let text = model.detokenize(&generated)?;
		let settled = text.trim_end_matches(char::REPLACEMENT_CHARACTER);
		if let Some(piece) = unseen_suffix(&emitted, settled) {
			if !emit(piece) {
				break FinishReason::Cancelled;
			}
			emitted.push_str(piece);
		}

		if model.cache_len(&cache) >= model.context_length() {
			break FinishReason::ContextFull;
		}
		logits = model.forward(&mut cache, &[token])?;
	};

	let text = model.detokenize(&generated)?;
	if finish != FinishReason::Cancelled {
		let rest = match unseen_suffix(&emitted, &text) {
			Some(rest) => rest,
			None if text.starts_with(emitted.as_str()) => "",
			None => {
				ui::debug("Decoder revised already streamed text; flushing past the common prefix");
				&text[common_prefix_len(&emitted, &text)..]
			}
		};
		if !rest.is_empty() && emit(rest) {
			emitted.push_str(rest);
		}
	}

	Ok(GenerationStats { tokens: generated.len(), elapsed: start.elapsed(), finish, text })
}

/// Text in `current` after what was already streamed, if `current` extends it.
fn unseen_suffix<'a>(emitted: &str, current: &'a str) -> Option<&'a str> {
	current.strip_prefix(emitted).filter(|piece| !piece.is_empty())
}

/// Byte length of the longest shared prefix, on a char boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
	a.char_indices()
		.zip(b.chars())
		.find(|((_, x), y)| x != y)
		.map(|((i, _), _)| i)
		.unwrap_or_else(|| a.len().min(b.len()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unseen_suffix_waits_for_growth() {
		assert_eq!(unseen_suffix("모나", "모나리자"), Some("리자"));
		assert_eq!(unseen_suffix("모나", "모나"), None);
		assert_eq!(unseen_suffix("모\u{FFFD}", "모나"), None);
	}

	#[test]
	fn common_prefix_stops_on_a_char_boundary() {
		assert_eq!(common_prefix_len("모\u{FFFD}", "모나"), "모".len());
		assert_eq!(common_prefix_len("ab", "abc"), 2);
		assert_eq!(common_prefix_len("", "abc"), 0);
	}
}
