//! Encode → decode must be the identity for every message shape.
use bytes::Bytes;

use galena_types::{
    BitArray, BlockId, Part, PartSetHeader, Proposal, Step, Tx, Vote, VoteType,
};
use galena_wire::{
    BlockPartMessage, ConsensusMessage, Envelope, HasProposalBlockPart, HasVote, Message,
    NewRoundStep, NewValidBlock, ProposalMessage, ProposalPol, Txs, VoteMessage, VoteSetBits,
    VoteSetMaj23,
};

fn block_id() -> BlockId {
    BlockId {
        hash: [3; 32],
        part_set_header: PartSetHeader {
            total: 5,
            hash: [4; 32],
        },
    }
}

fn bits(size: usize, set: &[usize]) -> BitArray {
    let mut ba = BitArray::new(size);
    for index in set {
        ba.set(*index, true);
    }
    ba
}

fn sample_messages() -> Vec<Message> {
    let consensus = vec![
        ConsensusMessage::NewRoundStep(NewRoundStep {
            height: 12,
            round: 3,
            step: Step::PrevoteWait,
            seconds_since_start_time: -2,
            last_commit_round: 1,
        }),
        ConsensusMessage::NewValidBlock(NewValidBlock {
            height: 12,
            round: 3,
            block_part_set_header: PartSetHeader {
                total: 4,
                hash: [9; 32],
            },
            block_parts: bits(4, &[0, 2]),
            is_commit: true,
        }),
        ConsensusMessage::Proposal(ProposalMessage {
            proposal: Proposal {
                height: 12,
                round: 3,
                pol_round: 1,
                block_id: block_id(),
                timestamp: 1_700_000_000_000,
                signature: vec![7; 64],
            },
        }),
        ConsensusMessage::ProposalPol(ProposalPol {
            height: 12,
            proposal_pol_round: 1,
            proposal_pol: bits(4, &[1, 3]),
        }),
        ConsensusMessage::BlockPart(BlockPartMessage {
            height: 12,
            round: 3,
            part: Part {
                index: 2,
                bytes: Bytes::from_static(b"part payload"),
                proof: [5; 32],
            },
        }),
        ConsensusMessage::Vote(VoteMessage {
            vote: Vote {
                vote_type: VoteType::Precommit,
                height: 12,
                round: 3,
                block_id: Some(block_id()),
                timestamp: 1_700_000_000_001,
                validator_index: 2,
                signature: vec![8; 64],
                extension: vec![1, 2, 3],
                extension_signature: vec![9; 64],
            },
        }),
        ConsensusMessage::HasVote(HasVote {
            height: 12,
            round: 3,
            vote_type: VoteType::Prevote,
            index: 1,
        }),
        ConsensusMessage::HasProposalBlockPart(HasProposalBlockPart {
            height: 12,
            round: 3,
            index: 0,
        }),
        ConsensusMessage::VoteSetMaj23(VoteSetMaj23 {
            height: 12,
            round: 3,
            vote_type: VoteType::Prevote,
            block_id: block_id(),
        }),
        ConsensusMessage::VoteSetBits(VoteSetBits {
            height: 12,
            round: 3,
            vote_type: VoteType::Precommit,
            block_id: block_id(),
            votes: bits(4, &[0, 1, 3]),
        }),
    ];

    consensus
        .into_iter()
        .map(Message::Consensus)
        .chain([Message::from(Txs {
            txs: vec![Tx::new(vec![1, 2, 3]), Tx::new(vec![4])],
        })])
        .collect()
}

#[test]
fn message_encoding_round_trips() {
    for message in sample_messages() {
        let encoded = borsh::to_vec(&message).unwrap();
        let decoded: Message = borsh::from_slice(&encoded).unwrap();
        assert_eq!(message, decoded);
    }
}

#[test]
fn envelopes_tag_their_own_channel() {
    for message in sample_messages() {
        let envelope = Envelope::new(message);
        assert!(envelope.channel_consistent());

        let encoded = borsh::to_vec(&envelope).unwrap();
        let decoded: Envelope = borsh::from_slice(&encoded).unwrap();
        assert_eq!(envelope, decoded);
    }
}

#[test]
fn truncated_messages_fail_to_decode() {
    let message = sample_messages().remove(0);
    let encoded = borsh::to_vec(&message).unwrap();
    assert!(borsh::from_slice::<Message>(&encoded[..encoded.len() - 1]).is_err());
}
