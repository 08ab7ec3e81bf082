//! # Galena Wire
//!
//! Every message the dissemination layer puts on the wire, the channels it
//! travels on, and the structural validation each message must pass before a
//! reactor acts on it.
//!
//! Framing and transport are not handled here; messages encode to and decode
//! from plain byte strings with borsh, and a higher layer moves those bytes.
use borsh::{BorshDeserialize, BorshSerialize};

mod channel;
mod consensus;
mod error;
mod mempool;

pub use channel::Channel;
pub use consensus::{
    BlockPartMessage, ConsensusMessage, HasProposalBlockPart, HasVote, NewRoundStep, NewValidBlock,
    ProposalMessage, ProposalPol, VoteMessage, VoteSetBits, VoteSetMaj23,
};
pub use error::MessageError;
pub use mempool::{MempoolMessage, Txs};

/// Any message of the dissemination layer.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    Consensus(ConsensusMessage),
    Mempool(MempoolMessage),
}

impl Message {
    /// The channel this message belongs on.
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Consensus(msg) => msg.channel(),
            Self::Mempool(msg) => msg.channel(),
        }
    }

    /// Structural validation of the payload.
    pub fn validate(&self) -> Result<(), MessageError> {
        match self {
            Self::Consensus(msg) => msg.validate(),
            Self::Mempool(msg) => msg.validate(),
        }
    }
}

/// A message tagged with the channel it travels on.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Envelope {
    pub channel: Channel,
    pub message: Message,
}

impl Envelope {
    /// Wraps a message, tagging it with its own channel.
    pub fn new(message: impl Into<Message>) -> Self {
        let message = message.into();
        Self {
            channel: message.channel(),
            message,
        }
    }

    /// `true` if the tagged channel is the one the payload belongs on.
    ///
    /// A decoded envelope whose tag disagrees with its payload is a protocol
    /// violation.
    pub fn channel_consistent(&self) -> bool {
        self.channel == self.message.channel()
    }
}

impl From<ConsensusMessage> for Message {
    fn from(msg: ConsensusMessage) -> Self {
        Self::Consensus(msg)
    }
}

impl From<MempoolMessage> for Message {
    fn from(msg: MempoolMessage) -> Self {
        Self::Mempool(msg)
    }
}

impl From<Txs> for Message {
    fn from(msg: Txs) -> Self {
        Self::Mempool(MempoolMessage::Txs(msg))
    }
}
