use rand::Rng;
use rand::seq::IndexedRandom;

/// Replies substituted when the endpoint cannot be reached from a non-local host.
pub const MOCK_REPLIES: [&str; 3] = [
    "I'm running in mock mode since I can't access your local LLM server. In a real setup, I would connect to your server at 127.0.0.1:11434.",
    "This is a simulated response. When running locally, I'll connect to your LLM server. In this preview environment, I'm using mock data instead.",
    "I notice we're in a preview environment where I can't access your local LLM. I'm providing this mock response instead. On your local machine, I'll connect properly to 127.0.0.1:11434.",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockReplies {
    replies: Vec<String>,
}

impl Default for MockReplies {
    fn default() -> Self {
        Self::new(MOCK_REPLIES.iter().map(|reply| reply.to_string()).collect())
    }
}

impl MockReplies {
    /// Uses the built-in pool when `replies` is empty.
    pub fn new(replies: Vec<String>) -> Self {
        if replies.is_empty() {
            return Self::default();
        }
        Self { replies }
    }

    pub fn replies(&self) -> &[String] {
        &self.replies
    }

    pub fn contains(&self, content: &str) -> bool {
        self.replies.iter().any(|reply| reply == content)
    }

    pub fn pick(&self) -> &str {
        self.pick_with(&mut rand::rng())
    }

    pub fn pick_with<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        self.replies
            .choose(rng)
            .map(String::as_str)
            .unwrap_or(MOCK_REPLIES[0])
    }
}
