//! Navigation against an embedded linear genome view.
//!
//! The view is reached through two optional capabilities. Which one a view
//! offers is resolved when the gateway is attached to a session, not on every
//! request.

use gba_core::{detect_format, normalize, ChromosomeFormat, Locus, Location, NavigationResult};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, RwLock},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_ASSEMBLY: &str = "hg38";
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedRegion {
    pub ref_name: String,
    pub start: u64,
    pub end: u64,
    pub assembly_name: Option<String>,
}

impl DisplayedRegion {
    pub fn location(&self) -> Location {
        Location {
            chromosome: self.ref_name.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ViewError(pub String);

pub trait NavigateByLocationString: Send + Sync {
    fn navigate_to_loc_string(&self, loc: &str) -> Result<(), ViewError>;
}

pub trait NavigateByRegionList: Send + Sync {
    fn set_displayed_regions(&self, regions: Vec<DisplayedRegion>) -> Result<(), ViewError>;
}

pub trait LinearGenomeView: Send + Sync {
    fn displayed_regions(&self) -> Vec<DisplayedRegion>;

    fn location_navigator(&self) -> Option<&dyn NavigateByLocationString> {
        None
    }

    fn region_navigator(&self) -> Option<&dyn NavigateByRegionList> {
        None
    }

    /// Change notification for the displayed regions, when the view has one.
    /// Without it the gateway falls back to a fixed settle delay.
    fn region_changes(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

pub trait GenomeSession: Send + Sync {
    fn views(&self) -> Vec<Arc<dyn LinearGenomeView>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationCapability {
    LocationString,
    RegionList,
}

impl NavigationCapability {
    pub fn resolve(view: &dyn LinearGenomeView) -> Option<Self> {
        if view.location_navigator().is_some() {
            Some(NavigationCapability::LocationString)
        } else if view.region_navigator().is_some() {
            Some(NavigationCapability::RegionList)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Naming of the loaded assembly when known up front; otherwise it is
    /// inferred from the displayed region.
    pub chromosome_format: Option<ChromosomeFormat>,
    /// Assembly name used for region-list navigation when the view shows none.
    pub default_assembly: String,
    pub settle_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            chromosome_format: None,
            default_assembly: DEFAULT_ASSEMBLY.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("no active genome session")]
    NoSession,
    #[error("session has no views")]
    NoViews,
    #[error("neither location-string nor region-list navigation is available")]
    Unavailable,
    #[error("invalid range: start {start} > end {end}")]
    InvalidRange { start: u64, end: u64 },
    #[error("view rejected navigation: {0}")]
    View(String),
    #[error("no displayed region readable after navigation")]
    Unconfirmed,
}

impl NavigationError {
    pub fn summary(&self) -> &'static str {
        match self {
            NavigationError::NoSession => "Session not found",
            NavigationError::NoViews => "No views found",
            NavigationError::Unavailable => "No suitable navigation method found",
            NavigationError::InvalidRange { .. } => "Invalid range",
            NavigationError::View(_) => "Navigation failed",
            NavigationError::Unconfirmed => "Navigation could not be confirmed",
        }
    }

    pub fn into_result(self) -> NavigationResult {
        NavigationResult::failed(self.summary(), Some(self.to_string()))
    }
}

struct Attachment {
    view: Option<Arc<dyn LinearGenomeView>>,
    capability: Option<NavigationCapability>,
}

pub struct NavigationGateway {
    config: GatewayConfig,
    attachment: RwLock<Option<Attachment>>,
}

impl NavigationGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            attachment: RwLock::new(None),
        }
    }

    pub fn with_session(config: GatewayConfig, session: Arc<dyn GenomeSession>) -> Self {
        let gateway = Self::new(config);
        gateway.attach(session);
        gateway
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Binds the gateway to a session's first view and resolves its
    /// navigation capability. Calling it again rebinds.
    pub fn attach(&self, session: Arc<dyn GenomeSession>) {
        let view = session.views().into_iter().next();
        let capability = view
            .as_deref()
            .and_then(|view| NavigationCapability::resolve(view));
        info!(
            event = "gateway_attach",
            has_view = view.is_some(),
            capability = ?capability
        );
        let mut slot = self.attachment.write().unwrap_or_else(|err| err.into_inner());
        *slot = Some(Attachment { view, capability });
    }

    pub fn detach(&self) {
        let mut slot = self.attachment.write().unwrap_or_else(|err| err.into_inner());
        *slot = None;
    }

    pub fn capability(&self) -> Option<NavigationCapability> {
        let slot = self.attachment.read().unwrap_or_else(|err| err.into_inner());
        slot.as_ref().and_then(|attachment| attachment.capability)
    }

    fn active_view(
        &self,
    ) -> Result<(Arc<dyn LinearGenomeView>, Option<NavigationCapability>), NavigationError> {
        let slot = self.attachment.read().unwrap_or_else(|err| err.into_inner());
        let attachment = slot.as_ref().ok_or(NavigationError::NoSession)?;
        let view = attachment.view.clone().ok_or(NavigationError::NoViews)?;
        Ok((view, attachment.capability))
    }

    pub fn resolve_format(&self, view: &dyn LinearGenomeView) -> ChromosomeFormat {
        if let Some(format) = self.config.chromosome_format {
            return format;
        }
        let regions = view.displayed_regions();
        detect_format(regions.first().map(|region| region.ref_name.as_str()))
    }

    pub async fn navigate_to_location(
        &self,
        chromosome: &str,
        start: u64,
        end: u64,
    ) -> NavigationResult {
        match self.try_navigate(chromosome, start, end).await {
            Ok(result) => result,
            Err(err) => {
                warn!(event = "navigate_failed", chromosome = chromosome, error = %err);
                err.into_result()
            }
        }
    }

    async fn try_navigate(
        &self,
        chromosome: &str,
        start: u64,
        end: u64,
    ) -> Result<NavigationResult, NavigationError> {
        if start > end {
            return Err(NavigationError::InvalidRange { start, end });
        }
        let (view, capability) = self.active_view()?;
        let capability = capability.ok_or(NavigationError::Unavailable)?;

        let format = self.resolve_format(view.as_ref());
        let normalized = normalize(chromosome, format);
        if normalized != chromosome {
            debug!(event = "chromosome_normalized", from = chromosome, to = %normalized, format = %format);
        }
        let changes = view.region_changes();

        let message = match capability {
            NavigationCapability::LocationString => {
                let navigator = view
                    .location_navigator()
                    .ok_or(NavigationError::Unavailable)?;
                let loc = Locus::new(normalized.as_str(), start, end).to_loc_string();
                info!(event = "navigate", method = "location_string", loc = %loc);
                guard_view_call(|| navigator.navigate_to_loc_string(&loc))?;
                format!("Successfully navigated to {loc}")
            }
            NavigationCapability::RegionList => {
                let navigator = view
                    .region_navigator()
                    .ok_or(NavigationError::Unavailable)?;
                let assembly_name = view
                    .displayed_regions()
                    .first()
                    .and_then(|region| region.assembly_name.clone())
                    .unwrap_or_else(|| self.config.default_assembly.clone());
                let region = DisplayedRegion {
                    ref_name: normalized.clone(),
                    start,
                    end,
                    assembly_name: Some(assembly_name),
                };
                info!(
                    event = "navigate",
                    method = "region_list",
                    chromosome = %normalized,
                    start = start,
                    end = end
                );
                guard_view_call(|| navigator.set_displayed_regions(vec![region]))?;
                format!("Successfully navigated to {normalized}:{start}..{end} using region list")
            }
        };

        self.settle(changes).await;

        let current = view
            .displayed_regions()
            .into_iter()
            .next()
            .ok_or(NavigationError::Unconfirmed)?;
        Ok(NavigationResult::succeeded(message, current.location()))
    }

    async fn settle(&self, changes: Option<watch::Receiver<u64>>) {
        match changes {
            Some(mut rx) => {
                if tokio::time::timeout(self.config.settle_delay, rx.changed())
                    .await
                    .is_err()
                {
                    debug!(event = "settle_timeout");
                }
            }
            None => tokio::time::sleep(self.config.settle_delay).await,
        }
    }

    pub fn current_location(&self) -> NavigationResult {
        let view = match self.active_view() {
            Ok((view, _)) => view,
            Err(err) => return NavigationResult::failed("View not found", Some(err.to_string())),
        };
        match view.displayed_regions().into_iter().next() {
            Some(region) => {
                NavigationResult::succeeded("Current location retrieved", region.location())
            }
            None => NavigationResult::failed("No displayed regions found", None),
        }
    }
}

fn guard_view_call<F>(call: F) -> Result<(), NavigationError>
where
    F: FnOnce() -> Result<(), ViewError>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(NavigationError::View(err.0)),
        Err(_) => Err(NavigationError::View("view panicked during navigation".to_string())),
    }
}
