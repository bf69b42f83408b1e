//! Per-page slot table.
//!
//! Every page of the open document has exactly one slot. The slot records
//! whether a decoded image is resident in memory, whether a decode is in
//! flight, and whether a copy of the image exists in the disk cache. All
//! transitions go through the table's mutex, which is what makes the
//! in-flight guard work: two callers asking for the same page race on
//! `try_begin_decode` and only one wins.

use std::sync::{Arc, Mutex};

use image::RgbaImage;

/// Lifecycle of a single page slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlotState {
    /// Never decoded in this session, or a decode failed.
    Empty,
    /// A worker is currently producing this page.
    Decoding,
    /// The decoded image is held in memory.
    Resident,
    /// The image was resident once and has been dropped from memory.
    Evicted,
}

/// One page's slot.
#[derive(Debug, Clone)]
pub struct PageSlot {
    pub state: PageSlotState,
    pub image: Option<Arc<RgbaImage>>,
    pub cached_on_disk: bool,
}

impl PageSlot {
    fn empty() -> Self {
        Self {
            state: PageSlotState::Empty,
            image: None,
            cached_on_disk: false,
        }
    }
}

/// Shared table of page slots, one per page of the document.
#[derive(Clone)]
pub struct SlotTable {
    slots: Arc<Mutex<Vec<PageSlot>>>,
}

impl SlotTable {
    pub fn new(page_count: u32) -> Self {
        Self {
            slots: Arc::new(Mutex::new(vec![PageSlot::empty(); page_count as usize])),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, index: u32) -> Option<PageSlotState> {
        self.slots
            .lock()
            .unwrap()
            .get(index as usize)
            .map(|slot| slot.state)
    }

    /// The resident image for `index`, if any.
    pub fn image(&self, index: u32) -> Option<Arc<RgbaImage>> {
        self.slots
            .lock()
            .unwrap()
            .get(index as usize)
            .and_then(|slot| slot.image.clone())
    }

    pub fn is_cached_on_disk(&self, index: u32) -> bool {
        self.slots
            .lock()
            .unwrap()
            .get(index as usize)
            .map(|slot| slot.cached_on_disk)
            .unwrap_or(false)
    }

    /// Claims `index` for decoding.
    ///
    /// Returns `true` only when the slot was `Empty` or `Evicted`; a slot
    /// that is already `Decoding` or `Resident` is left alone, so at most
    /// one decode per page is ever in flight.
    pub fn try_begin_decode(&self, index: u32) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(index as usize) {
            Some(slot) if matches!(slot.state, PageSlotState::Empty | PageSlotState::Evicted) => {
                slot.state = PageSlotState::Decoding;
                true
            }
            _ => false,
        }
    }

    /// Completes a decode claimed with [`try_begin_decode`].
    ///
    /// With an image the slot becomes `Resident`; without one only the
    /// disk-cache flag is recorded and the slot returns to `Empty`, which
    /// is the shape of a page rendered to disk but not kept in memory.
    ///
    /// [`try_begin_decode`]: SlotTable::try_begin_decode
    pub fn publish(&self, index: u32, image: Option<Arc<RgbaImage>>, cached_on_disk: bool) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(index as usize) {
            slot.cached_on_disk = slot.cached_on_disk || cached_on_disk;
            match image {
                Some(image) => {
                    slot.image = Some(image);
                    slot.state = PageSlotState::Resident;
                }
                None => {
                    slot.image = None;
                    slot.state = PageSlotState::Empty;
                }
            }
        }
    }

    /// Releases a claimed slot after a failed or abandoned decode.
    pub fn fail(&self, index: u32) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(index as usize) {
            if slot.state == PageSlotState::Decoding {
                slot.state = PageSlotState::Empty;
                slot.image = None;
            }
        }
    }

    /// Drops the resident image for `index`. Non-resident slots are untouched.
    pub fn evict(&self, index: u32) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(index as usize) {
            if slot.state == PageSlotState::Resident {
                slot.state = PageSlotState::Evicted;
                slot.image = None;
            }
        }
    }

    /// Indices of all slots currently holding an image.
    pub fn resident_indices(&self) -> Vec<u32> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == PageSlotState::Resident)
            .map(|(index, _)| index as u32)
            .collect()
    }
}
