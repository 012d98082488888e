use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::{
    error::SlideError,
    events::EventBus,
    types::{Slide, StorageRef},
    workers::SlidesChanged,
};

enum Edit {
    Added { id: Uuid },
    Replaced { index: usize, previous: Slide },
    Deleted { index: usize, slide: Slide },
}

/// The editable slide list of one project. Never empty.
///
/// Every mutation publishes a [`SlidesChanged`] snapshot; saving it is up to
/// whoever subscribes (see [`crate::workers::SlidePersistWorker`]).
pub struct SlideDeck {
    project_id: String,
    slides: Vec<Slide>,
    history: Vec<Edit>,
    bus: EventBus,
}

impl SlideDeck {
    pub fn new(
        project_id: impl Into<String>,
        slides: Vec<Slide>,
        bus: EventBus,
    ) -> Result<Self, SlideError> {
        if slides.is_empty() {
            return Err(SlideError::EmptyDeck);
        }

        Ok(Self {
            project_id: project_id.into(),
            slides,
            history: Vec::new(),
            bus,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Slide> {
        self.slides.iter().find(|s| s.id == id)
    }

    fn position(&self, id: Uuid) -> Result<usize, SlideError> {
        self.slides
            .iter()
            .position(|s| s.id == id)
            .ok_or(SlideError::NotFound(id))
    }

    pub fn add_slide(&mut self, slide: Slide) -> Uuid {
        let id = slide.id;
        self.slides.push(slide);
        self.history.push(Edit::Added { id });
        self.publish();
        id
    }

    pub fn update_slide(
        &mut self,
        id: Uuid,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), SlideError> {
        let index = self.position(id)?;
        let slide = &mut self.slides[index];
        let previous = slide.clone();
        slide.title = title.into();
        slide.content = content.into();

        self.history.push(Edit::Replaced { index, previous });
        self.publish();
        Ok(())
    }

    pub fn replace_images(&mut self, id: Uuid, image_refs: Vec<StorageRef>) -> Result<(), SlideError> {
        let index = self.position(id)?;
        let previous = std::mem::replace(&mut self.slides[index].image_refs, image_refs);
        let mut snapshot = self.slides[index].clone();
        snapshot.image_refs = previous;

        self.history.push(Edit::Replaced {
            index,
            previous: snapshot,
        });
        self.publish();
        Ok(())
    }

    /// Removes a slide. The sole remaining slide cannot be deleted; the deck
    /// is left untouched in that case.
    pub fn delete_slide(&mut self, id: Uuid) -> Result<Slide, SlideError> {
        let index = self.position(id)?;
        if self.slides.len() == 1 {
            return Err(SlideError::LastSlide);
        }

        let slide = self.slides.remove(index);
        self.history.push(Edit::Deleted {
            index,
            slide: slide.clone(),
        });
        self.publish();
        Ok(slide)
    }

    /// Reverts the most recent edit. A deleted slide comes back at the index
    /// it was deleted from.
    pub fn undo(&mut self) -> Result<(), SlideError> {
        let edit = self.history.pop().ok_or(SlideError::NothingToUndo)?;

        match edit {
            Edit::Added { id } => {
                let index = self.position(id)?;
                if self.slides.len() == 1 {
                    self.history.push(Edit::Added { id });
                    return Err(SlideError::LastSlide);
                }
                self.slides.remove(index);
            }
            Edit::Replaced { index, previous } => {
                let slot = self
                    .slides
                    .get_mut(index)
                    .filter(|s| s.id == previous.id)
                    .ok_or(SlideError::NotFound(previous.id))?;
                *slot = previous;
            }
            Edit::Deleted { index, slide } => {
                let index = index.min(self.slides.len());
                self.slides.insert(index, slide);
            }
        }

        self.publish();
        Ok(())
    }

    /// Publishes the current slide list.
    pub fn publish(&self) {
        debug!(project = %self.project_id, slides = self.slides.len(), "slides changed");
        self.bus.publish(Arc::new(SlidesChanged::new(
            self.project_id.clone(),
            self.slides.clone(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::{BusConfig, EventBusBuilder, detached_bus, downcast_ref},
        queues::QueueKind,
        workers::{InputSpec, SubscriptionSpec, WorkerBatch},
    };

    fn deck(n: usize) -> SlideDeck {
        let slides = (0..n).map(|i| Slide::new(format!("Slide {i}"), "")).collect();
        SlideDeck::new("project", slides, detached_bus()).unwrap()
    }

    fn titles(deck: &SlideDeck) -> Vec<&str> {
        deck.slides().iter().map(|s| s.title.as_str()).collect()
    }

    #[test]
    fn empty_deck_is_rejected() {
        assert!(matches!(
            SlideDeck::new("p", Vec::new(), detached_bus()),
            Err(SlideError::EmptyDeck)
        ));
    }

    #[test]
    fn last_slide_cannot_be_deleted() {
        let mut deck = deck(1);
        let id = deck.slides()[0].id;

        assert_eq!(deck.delete_slide(id), Err(SlideError::LastSlide));
        assert_eq!(deck.len(), 1);
        assert_eq!(deck.undo(), Err(SlideError::NothingToUndo));
    }

    #[test]
    fn undo_restores_deleted_slide_at_its_index() {
        let mut deck = deck(3);
        let middle = deck.slides()[1].clone();

        deck.delete_slide(middle.id).unwrap();
        assert_eq!(titles(&deck), vec!["Slide 0", "Slide 2"]);

        deck.undo().unwrap();
        assert_eq!(titles(&deck), vec!["Slide 0", "Slide 1", "Slide 2"]);
        assert_eq!(deck.slides()[1], middle);
    }

    #[test]
    fn undo_reverts_edits_and_image_assignment() {
        let mut deck = deck(2);
        let id = deck.slides()[0].id;

        deck.update_slide(id, "Renamed", "body").unwrap();
        deck.replace_images(id, vec![StorageRef("f.jpg".into())]).unwrap();

        deck.undo().unwrap();
        assert!(deck.get(id).unwrap().image_refs.is_empty());
        assert_eq!(deck.get(id).unwrap().title, "Renamed");

        deck.undo().unwrap();
        assert_eq!(deck.get(id).unwrap().title, "Slide 0");
    }

    #[test]
    fn undo_removes_added_slide() {
        let mut deck = deck(1);
        let id = deck.add_slide(Slide::new("Extra", ""));
        assert_eq!(deck.len(), 2);

        deck.undo().unwrap();
        assert!(deck.get(id).is_none());
    }

    #[test]
    fn unknown_slide_is_not_found() {
        let mut deck = deck(2);
        let id = Uuid::new_v4();
        assert_eq!(deck.delete_slide(id), Err(SlideError::NotFound(id)));
        assert_eq!(deck.update_slide(id, "x", "y"), Err(SlideError::NotFound(id)));
    }

    #[tokio::test]
    async fn mutations_publish_snapshots() {
        let (bus, mut wiring, tasks) = EventBusBuilder::new(BusConfig::default())
            .subscribe(SubscriptionSpec {
                subscriber_id: "observer",
                inputs: vec![InputSpec {
                    event_type: SlidesChanged::EVENT_TYPE,
                    queue_kind: QueueKind::FifoDropOldest { capacity: 8 },
                }],
            })
            .build()
            .unwrap();
        tasks.spawn_all();
        let mut inputs = wiring.take("observer").unwrap();

        let mut deck = SlideDeck::new("p", vec![Slide::new("a", ""), Slide::new("b", "")], bus)
            .unwrap();
        let id = deck.slides()[0].id;
        deck.delete_slide(id).unwrap();
        let _ = deck.delete_slide(deck.slides()[0].id);

        let Some(WorkerBatch::FifoItem { event, .. }) = inputs.try_next() else {
            panic!("expected a slides.changed event");
        };
        let changed = downcast_ref::<SlidesChanged>(&event.event).unwrap();
        assert_eq!(changed.project_id, "p");
        assert_eq!(changed.slides.len(), 1);

        assert!(inputs.try_next().is_none());
    }
}
