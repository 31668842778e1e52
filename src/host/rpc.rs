//! Typed wrappers over the raw request/response correlation.

use crate::protocol::requests::*;
use crate::protocol::{PlayerRequest, PlayerResponse};

use super::client::{ClientHandle, RpcError};

macro_rules! rpc_method {
    ($name:ident, $variant:ident, $req:ty, $resp:ty) => {
        pub async fn $name(&self, req: $req) -> Result<$resp, RpcError> {
            match self.call(PlayerRequest::$variant(req)).await? {
                PlayerResponse::$variant(resp) => Ok(resp),
                _ => Err(RpcError::UnexpectedResponse),
            }
        }
    };
}

impl ClientHandle {
    rpc_method!(join, Join, JoinRequest, JoinResponse);
    rpc_method!(game_start, GameStart, GameStartRequest, SignatureResponse);
    rpc_method!(game_end, GameEnd, GameEndRequest, SignatureResponse);
    rpc_method!(hand_start, HandStart, HandStartRequest, SignatureResponse);
    rpc_method!(hand_end, HandEnd, HandEndRequest, HandEndResponse);
    rpc_method!(shuffle, Shuffle, ShuffleRequest, ShuffleResponse);
    rpc_method!(
        choose_color_since_first_card_is_wild,
        ChooseColorSinceFirstCardIsWild,
        ChooseColorRequest,
        ChooseColorResponse
    );
    rpc_method!(
        get_deck_top_decryption_key,
        GetDeckTopDecryptionKey,
        GetDeckTopDecryptionKeyRequest,
        GetDeckTopDecryptionKeyResponse
    );
    rpc_method!(
        give_deck_top_card,
        GiveDeckTopCard,
        GiveDeckTopCardRequest,
        GiveDeckTopCardResponse
    );
    rpc_method!(play, Play, PlayRequest, PlayResponse);
    rpc_method!(
        should_challenge_wild_draw_four,
        ShouldChallengeWildDrawFour,
        ShouldChallengeRequest,
        ShouldChallengeResponse
    );
    rpc_method!(
        reveal_cards_for_challenge,
        RevealCardsForChallenge,
        RevealCardsRequest,
        RevealCardsResponse
    );
    rpc_method!(
        revealed_cards_for_challenge,
        RevealedCardsForChallenge,
        RevealedCardsRequest,
        RevealedCardsResponse
    );
}
