//! In-process stand-in for the embedded genome widget.

use crate::navigation::{
    DisplayedRegion, GenomeSession, LinearGenomeView, NavigateByLocationString,
    NavigateByRegionList, ViewError,
};
use gba_core::{parse_locus, GenomePreset};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewCapabilities {
    pub location_string: bool,
    pub region_list: bool,
    pub change_notifications: bool,
}

impl ViewCapabilities {
    pub fn both() -> Self {
        Self {
            location_string: true,
            region_list: true,
            change_notifications: true,
        }
    }

    pub fn location_string_only() -> Self {
        Self {
            region_list: false,
            ..Self::both()
        }
    }

    pub fn region_list_only() -> Self {
        Self {
            location_string: false,
            ..Self::both()
        }
    }

    pub fn none() -> Self {
        Self {
            location_string: false,
            region_list: false,
            change_notifications: false,
        }
    }

    pub fn without_notifications(self) -> Self {
        Self {
            change_notifications: false,
            ..self
        }
    }
}

pub struct HeadlessGenomeView {
    capabilities: ViewCapabilities,
    regions: Mutex<Vec<DisplayedRegion>>,
    revision: watch::Sender<u64>,
    loc_string_calls: Mutex<Vec<String>>,
    pending_failure: Mutex<Option<String>>,
    swallow_navigation: AtomicBool,
}

impl HeadlessGenomeView {
    pub fn new(capabilities: ViewCapabilities, initial: Option<DisplayedRegion>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            capabilities,
            regions: Mutex::new(initial.into_iter().collect()),
            revision,
            loc_string_calls: Mutex::new(Vec::new()),
            pending_failure: Mutex::new(None),
            swallow_navigation: AtomicBool::new(false),
        }
    }

    /// Opens the preset's default location.
    pub fn from_preset(preset: &GenomePreset, capabilities: ViewCapabilities) -> Self {
        let initial = parse_locus(preset.default_location)
            .ok()
            .map(|locus| DisplayedRegion {
                ref_name: locus.ref_name,
                start: locus.start,
                end: locus.end,
                assembly_name: Some(preset.assembly_name.to_string()),
            });
        Self::new(capabilities, initial)
    }

    /// Region-change feed that works regardless of the advertised capabilities.
    pub fn watch_regions(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn loc_string_calls(&self) -> Vec<String> {
        lock(&self.loc_string_calls).clone()
    }

    pub fn fail_next_navigation(&self, reason: &str) {
        *lock(&self.pending_failure) = Some(reason.to_string());
    }

    /// Accept navigation calls but drop the displayed regions, as a widget
    /// that has not rendered yet would.
    pub fn set_swallow_navigation(&self, swallow: bool) {
        self.swallow_navigation.store(swallow, Ordering::SeqCst);
    }

    fn apply(&self, regions: Vec<DisplayedRegion>) -> Result<(), ViewError> {
        if let Some(reason) = lock(&self.pending_failure).take() {
            return Err(ViewError(reason));
        }
        let next = if self.swallow_navigation.load(Ordering::SeqCst) {
            Vec::new()
        } else {
            regions
        };
        *lock(&self.regions) = next;
        self.revision.send_modify(|rev| *rev += 1);
        Ok(())
    }

    fn current_assembly(&self) -> Option<String> {
        lock(&self.regions)
            .first()
            .and_then(|region| region.assembly_name.clone())
    }
}

impl LinearGenomeView for HeadlessGenomeView {
    fn displayed_regions(&self) -> Vec<DisplayedRegion> {
        lock(&self.regions).clone()
    }

    fn location_navigator(&self) -> Option<&dyn NavigateByLocationString> {
        if self.capabilities.location_string {
            Some(self)
        } else {
            None
        }
    }

    fn region_navigator(&self) -> Option<&dyn NavigateByRegionList> {
        if self.capabilities.region_list {
            Some(self)
        } else {
            None
        }
    }

    fn region_changes(&self) -> Option<watch::Receiver<u64>> {
        if self.capabilities.change_notifications {
            Some(self.revision.subscribe())
        } else {
            None
        }
    }
}

impl NavigateByLocationString for HeadlessGenomeView {
    fn navigate_to_loc_string(&self, loc: &str) -> Result<(), ViewError> {
        lock(&self.loc_string_calls).push(loc.to_string());
        let locus = parse_locus(loc).map_err(|err| ViewError(err.to_string()))?;
        let region = DisplayedRegion {
            ref_name: locus.ref_name,
            start: locus.start,
            end: locus.end,
            assembly_name: self.current_assembly(),
        };
        self.apply(vec![region])
    }
}

impl NavigateByRegionList for HeadlessGenomeView {
    fn set_displayed_regions(&self, regions: Vec<DisplayedRegion>) -> Result<(), ViewError> {
        self.apply(regions)
    }
}

pub struct HeadlessSession {
    views: Vec<Arc<HeadlessGenomeView>>,
}

impl HeadlessSession {
    pub fn new(views: Vec<Arc<HeadlessGenomeView>>) -> Self {
        Self { views }
    }
}

impl GenomeSession for HeadlessSession {
    fn views(&self) -> Vec<Arc<dyn LinearGenomeView>> {
        self.views
            .iter()
            .map(|view| view.clone() as Arc<dyn LinearGenomeView>)
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}
