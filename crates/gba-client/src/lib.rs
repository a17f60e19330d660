//! Client side of the genome browser assistant: the realtime channel to the
//! assistant backend, navigation into a linear genome view, and the chat
//! session that ties them together.

pub mod channel;
pub mod config;
pub mod navigation;
pub mod session;
pub mod view;

pub use channel::{
    ChannelConfig, ChannelError, ObserverId, RealtimeChannel, ReconnectPolicy, DEFAULT_BACKEND_URL,
};
pub use navigation::{
    DisplayedRegion, GatewayConfig, GenomeSession, LinearGenomeView, NavigateByLocationString,
    NavigateByRegionList, NavigationCapability, NavigationError, NavigationGateway, ViewError,
};
pub use session::{ChatError, ChatOptions, ChatSession, TestConnectionStatus};
pub use view::{HeadlessGenomeView, HeadlessSession, ViewCapabilities};
