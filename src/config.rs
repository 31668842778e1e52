use std::time::Duration;

/// Process-wide limits and tunables. One instance is shared by the host and
/// by each peer; the defaults match the published protocol constants, so two
/// processes built from different configs still interoperate as long as the
/// signature-relevant values (prime sizes, hand size, winning score) agree.
#[derive(Clone, Debug)]
pub struct Config {
    pub max_players: usize,
    pub max_chat_messages_kept: usize,
    pub random_nonce_size: usize,
    pub max_name_len: usize,
    pub max_chat_content_len: usize,
    pub max_rpc_wait: Duration,
    pub max_ui_wait: Duration,
    /// Bit length of the shared prime the host generates per hand.
    pub shared_prime_bits: u64,
    /// Minimum bit length a peer will accept for the shared prime.
    pub min_shared_prime_bits: u64,
    /// Bit length of per-peer SRA encryption exponents.
    pub sra_key_bits: u64,
    pub winning_score: u32,
    pub starting_hand_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_players: 10,
            max_chat_messages_kept: 50,
            random_nonce_size: 10,
            max_name_len: 80,
            max_chat_content_len: 500,
            max_rpc_wait: Duration::from_secs(60),
            max_ui_wait: Duration::from_secs(60),
            shared_prime_bits: 256,
            min_shared_prime_bits: 128,
            sra_key_bits: 32,
            winning_score: 500,
            starting_hand_size: 7,
        }
    }
}
