//! Site topologies.
//!
//! Every mutator returns whatever it displaced so the orchestrator can derive
//! ledger deltas from a single pass over the content, without re-reading it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BoundResource, SiteType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("index {index} out of range for queue of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Decides which container entries `clean_deviation` drops.
pub trait DeviationFilter: Send + Sync {
    fn is_deviation(&self, resource: &BoundResource) -> bool;
}

impl<F> DeviationFilter for F
where
    F: Fn(&BoundResource) -> bool + Send + Sync,
{
    fn is_deviation(&self, resource: &BoundResource) -> bool {
        self(resource)
    }
}

// ── Slot ──────────────────────────────────────────────────────

/// Holds zero or one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    resource: Option<BoundResource>,
}

impl Slot {
    pub fn new(resource: Option<BoundResource>) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> Option<&BoundResource> {
        self.resource.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.resource.is_none()
    }

    pub fn bind(&mut self, resource: BoundResource) -> Option<BoundResource> {
        self.resource.replace(resource)
    }

    pub fn clear(&mut self) -> Option<BoundResource> {
        self.resource.take()
    }
}

// ── Container / Collection ────────────────────────────────────

macro_rules! resource_bag {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            resources: Vec<BoundResource>,
        }

        impl $name {
            pub fn new(resources: Vec<BoundResource>) -> Self {
                Self { resources }
            }

            pub fn resources(&self) -> &[BoundResource] {
                &self.resources
            }

            pub fn is_empty(&self) -> bool {
                self.resources.is_empty()
            }

            /// Replaces the whole set, returning the previous one.
            pub fn bind(&mut self, resources: Vec<BoundResource>) -> Vec<BoundResource> {
                std::mem::replace(&mut self.resources, resources)
            }

            /// Appends; nothing is displaced.
            pub fn add(&mut self, resources: Vec<BoundResource>) {
                self.resources.extend(resources);
            }

            pub fn clear(&mut self) -> Vec<BoundResource> {
                std::mem::take(&mut self.resources)
            }

            /// Housekeeping only: drops entries the filter flags and reports
            /// nothing as displaced.
            pub fn clean_deviation(&mut self, filter: &dyn DeviationFilter) {
                self.resources.retain(|r| !filter.is_deviation(r));
            }
        }
    };
}

resource_bag!(
    /// Unordered bin of loose material.
    Container
);

resource_bag!(
    /// Unordered group of resources; same verbs as [`Container`], used for a
    /// different logical grouping and as the element of a [`Colqueue`].
    Collection
);

// ── Queue ─────────────────────────────────────────────────────

/// Fixed-position queue whose positions may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    entries: VecDeque<Option<BoundResource>>,
}

impl Queue {
    pub fn new(entries: impl IntoIterator<Item = Option<BoundResource>>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn entries(&self) -> &VecDeque<Option<BoundResource>> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no position holds a resource.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    pub fn push(&mut self, resource: BoundResource, head: bool) {
        if head {
            self.entries.push_front(Some(resource));
        } else {
            self.entries.push_back(Some(resource));
        }
    }

    /// Takes the head position.
    pub fn pop(&mut self) -> Option<BoundResource> {
        self.entries.pop_front().flatten()
    }

    /// Push at one end and pop from the other, keeping the length unchanged.
    pub fn push_pop(&mut self, resource: BoundResource, head: bool) -> Option<BoundResource> {
        if head {
            self.entries.push_front(Some(resource));
            self.entries.pop_back().flatten()
        } else {
            self.entries.push_back(Some(resource));
            self.entries.pop_front().flatten()
        }
    }

    /// Replaces the content at `index`, growing the queue with empty
    /// positions when `index` lies past the tail.
    pub fn bind(&mut self, index: usize, resource: BoundResource) -> Option<BoundResource> {
        if index >= self.entries.len() {
            self.entries.resize(index + 1, None);
        }
        self.entries[index].replace(resource)
    }

    pub fn remove(&mut self, index: usize) -> Result<Option<BoundResource>, TopologyError> {
        let len = self.entries.len();
        self.entries
            .remove(index)
            .ok_or(TopologyError::IndexOutOfRange { index, len })
    }

    pub fn clear(&mut self) -> Vec<BoundResource> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .flatten()
            .collect()
    }
}

// ── Colqueue ──────────────────────────────────────────────────

/// Queue of collections, each addressed by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Colqueue {
    collections: VecDeque<Collection>,
}

impl Colqueue {
    pub fn new(collections: impl IntoIterator<Item = Collection>) -> Self {
        Self {
            collections: collections.into_iter().collect(),
        }
    }

    pub fn collections(&self) -> &VecDeque<Collection> {
        &self.collections
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.iter().all(Collection::is_empty)
    }

    /// Inserts a new collection at `index` (`index == len` appends).
    pub fn push(&mut self, index: usize, collection: Collection) -> Result<(), TopologyError> {
        let len = self.collections.len();
        if index > len {
            return Err(TopologyError::IndexOutOfRange { index, len });
        }
        self.collections.insert(index, collection);
        Ok(())
    }

    /// Removes the head collection and returns its resources.
    pub fn pop(&mut self) -> Vec<BoundResource> {
        self.collections
            .pop_front()
            .map(|mut c| c.clear())
            .unwrap_or_default()
    }

    /// Inserts at `index` and pops from the opposite end: the tail when
    /// inserting at the head, the head otherwise.
    pub fn push_pop(
        &mut self,
        index: usize,
        collection: Collection,
    ) -> Result<Vec<BoundResource>, TopologyError> {
        self.push(index, collection)?;
        if index == 0 {
            Ok(self
                .collections
                .pop_back()
                .map(|mut c| c.clear())
                .unwrap_or_default())
        } else {
            Ok(self.pop())
        }
    }

    /// Replaces the collection at `index`, returning its previous resources.
    pub fn bind(&mut self, index: usize, resources: Vec<BoundResource>) -> Vec<BoundResource> {
        self.ensure_index(index);
        self.collections[index].bind(resources)
    }

    pub fn add(&mut self, index: usize, resources: Vec<BoundResource>) {
        self.ensure_index(index);
        self.collections[index].add(resources);
    }

    pub fn remove(&mut self, index: usize) -> Result<Vec<BoundResource>, TopologyError> {
        let len = self.collections.len();
        self.collections
            .remove(index)
            .map(|mut c| c.clear())
            .ok_or(TopologyError::IndexOutOfRange { index, len })
    }

    pub fn clear(&mut self) -> Vec<BoundResource> {
        std::mem::take(&mut self.collections)
            .into_iter()
            .flat_map(|mut c| c.clear())
            .collect()
    }

    fn ensure_index(&mut self, index: usize) {
        if index >= self.collections.len() {
            self.collections.resize_with(index + 1, Collection::default);
        }
    }
}

// ── SiteContent ───────────────────────────────────────────────

/// Polymorphic site content; the variant *is* the site type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteContent {
    Slot(Slot),
    Container(Container),
    Collection(Collection),
    Queue(Queue),
    Colqueue(Colqueue),
}

impl SiteContent {
    pub fn empty(site_type: SiteType) -> Self {
        match site_type {
            SiteType::Slot => Self::Slot(Slot::default()),
            SiteType::Container => Self::Container(Container::default()),
            SiteType::Collection => Self::Collection(Collection::default()),
            SiteType::Queue => Self::Queue(Queue::default()),
            SiteType::Colqueue => Self::Colqueue(Colqueue::default()),
        }
    }

    pub fn site_type(&self) -> SiteType {
        match self {
            Self::Slot(_) => SiteType::Slot,
            Self::Container(_) => SiteType::Container,
            Self::Collection(_) => SiteType::Collection,
            Self::Queue(_) => SiteType::Queue,
            Self::Colqueue(_) => SiteType::Colqueue,
        }
    }

    /// Emptiness predicate used by site removal.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Slot(s) => s.is_empty(),
            Self::Container(c) => c.is_empty(),
            Self::Collection(c) => c.is_empty(),
            Self::Queue(q) => q.is_empty(),
            Self::Colqueue(q) => q.is_empty(),
        }
    }

    /// Every resource currently placed, in storage order.
    pub fn resources(&self) -> Vec<&BoundResource> {
        match self {
            Self::Slot(s) => s.resource().into_iter().collect(),
            Self::Container(c) => c.resources().iter().collect(),
            Self::Collection(c) => c.resources().iter().collect(),
            Self::Queue(q) => q.entries().iter().flatten().collect(),
            Self::Colqueue(q) => q
                .collections()
                .iter()
                .flat_map(|c| c.resources().iter())
                .collect(),
        }
    }
}
