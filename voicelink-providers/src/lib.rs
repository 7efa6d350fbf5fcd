pub mod channel;
pub mod openai_realtime;
pub mod parse;

pub use channel::{AgentChannel, AgentSender, ChannelPeer};
pub use openai_realtime::RealtimeConnectConfig;
