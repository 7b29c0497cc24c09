pub mod audit_log;
pub mod content;
pub mod content_deal;
pub mod content_deal_proposal_parameters;
pub mod content_miner;
pub mod content_wallet;
pub mod deal_replacement;
pub mod piece_commitment;
