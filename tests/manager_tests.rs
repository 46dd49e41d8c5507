//! EntityManager tests: spawn/remove lifecycle, persistence, hooks, animation

mod common;

#[cfg(test)]
mod tests {
    use super::common::{loc, Harness};
    use janet_display::{
        appearance::Appearance,
        error::DisplayError,
        manager::{LifecycleHandler, SpawnOptions, TextAnimation},
        persistence::{DescriptorStore, MemoryStore},
        protocol::{subjects, AppearanceMeta, MetaPayload, Packet},
        types::{ClientId, RenderMode},
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    // -----------------------------------------------------------------------
    // Spawn / remove
    // -----------------------------------------------------------------------

    #[test]
    fn spawn_registers_and_places_on_sync_lane() {
        let h = Harness::new();
        let e = h.manager.new_display("e1", Appearance::text("hi")).unwrap();
        let e = h
            .manager
            .spawn(e, loc(1.0, 2.0, 3.0), SpawnOptions::default())
            .unwrap();

        assert!(h.manager.exists("e1"));
        assert!(!e.is_alive());
        assert!(e.location().is_none());

        h.scheduler.run_pending();
        assert!(e.is_alive());
        assert_eq!(e.location(), Some(loc(1.0, 2.0, 3.0)));
        assert!(Arc::ptr_eq(&h.manager.get_by_numeric_id(e.numeric_id()).unwrap(), &e));
    }

    #[test]
    fn ignore_pitch_yaw_zeroes_rotation() {
        let h = Harness::new();
        let e = h.manager.new_display("e1", Appearance::block(1)).unwrap();
        let e = h
            .manager
            .spawn(
                e,
                loc(0.0, 0.0, 0.0).with_rotation(45.0, 10.0),
                SpawnOptions {
                    ignore_pitch_yaw: true,
                    ..Default::default()
                },
            )
            .unwrap();
        h.scheduler.run_pending();

        let at = e.location().unwrap();
        assert_eq!((at.yaw, at.pitch), (0.0, 0.0));
    }

    #[test]
    fn duplicate_spawn_fails_and_keeps_original() {
        let h = Harness::new();
        let original = h.spawn_text("lb1", RenderMode::All, loc(0.0, 0.0, 0.0));

        let dup = h.manager.new_display("lb1", Appearance::text("other")).unwrap();
        let err = h
            .manager
            .spawn(dup, loc(9.0, 9.0, 9.0), SpawnOptions::default())
            .unwrap_err();
        assert!(matches!(err, DisplayError::DuplicateId(id) if id == "lb1"));

        h.scheduler.run_pending();
        let kept = h.manager.get("lb1").unwrap();
        assert!(Arc::ptr_eq(&kept, &original));
        assert_eq!(kept.location(), Some(loc(0.0, 0.0, 0.0)));
        assert_eq!(kept.appearance(), Some(Appearance::text("lb1")));
        assert_eq!(h.manager.len(), 1);
    }

    #[test]
    fn remove_twice_returns_false_the_second_time() {
        let h = Harness::new();
        let v = h.join("v", 1, loc(1.0, 0.0, 0.0));
        let e = h.spawn_text("e1", RenderMode::All, loc(0.0, 0.0, 0.0));

        assert!(h.manager.remove("e1", false));
        assert!(!h.manager.remove("e1", false));
        assert!(!h.manager.exists("e1"));
        assert!(!e.is_alive());
        assert!(e.task_handle().is_none());
        assert_eq!(h.subjects_to(&v).last(), Some(&subjects::DESTROY_ENTITIES));
    }

    #[test]
    fn remove_before_placement_never_revives() {
        let h = Harness::new();
        let e = h.manager.new_display("e1", Appearance::text("x")).unwrap();
        let e = h
            .manager
            .spawn(e, loc(0.0, 0.0, 0.0), SpawnOptions::default())
            .unwrap();
        assert!(h.manager.remove("e1", false));

        h.scheduler.run_pending();
        assert!(!e.is_alive());
    }

    #[test]
    fn remove_detaches_from_host_manifest() {
        let h = Harness::new();
        let e = h.spawn_text("e1", RenderMode::All, loc(0.0, 0.0, 0.0));
        h.manager.attach("e1", 500).unwrap();
        assert!(h.manager.engine().passengers().get(500).contains(&e.numeric_id()));

        h.manager.remove("e1", false);
        assert!(h.manager.engine().passengers().get(500).is_empty());
    }

    #[test]
    fn removing_rider_sends_nothing_to_its_host() {
        let h = Harness::new();
        let host = h.join("host", 500, loc(2.0, 0.0, 0.0));
        let v = h.join("v", 1, loc(3.0, 0.0, 0.0));
        let e = h.spawn_text("e1", RenderMode::NotAttachedToViewerHost, loc(0.0, 0.0, 0.0));
        h.manager.attach("e1", 500).unwrap();
        h.scheduler.run_pending();
        h.transport.clear();

        assert!(h.manager.remove("e1", false));
        h.scheduler.run_pending();

        assert!(h.subjects_to(&host).is_empty());
        assert_eq!(h.subjects_to(&v), vec![subjects::DESTROY_ENTITIES]);
        assert!(e.viewers().is_empty());
        assert!(h.manager.engine().passengers().get(500).is_empty());
    }

    #[test]
    fn remove_all_clears_everything() {
        let h = Harness::new();
        h.spawn_text("a", RenderMode::All, loc(0.0, 0.0, 0.0));
        h.spawn_text("b", RenderMode::All, loc(1.0, 0.0, 0.0));

        assert_eq!(h.manager.remove_all(false), 2);
        assert!(h.manager.is_empty());
        assert_eq!(h.manager.remove_all(false), 0);
    }

    #[test]
    fn queries_are_ordered_by_id() {
        let h = Harness::new();
        h.spawn_text("zeta", RenderMode::All, loc(0.0, 0.0, 0.0));
        h.spawn_text("alpha", RenderMode::All, loc(0.0, 0.0, 0.0));

        assert_eq!(h.manager.ids(), vec!["alpha", "zeta"]);
        let listed: Vec<_> = h.manager.list().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(listed, vec!["alpha", "zeta"]);
        assert!(h.manager.get("missing").is_none());
        assert!(matches!(
            h.manager.update("missing"),
            Err(DisplayError::UnknownEntity(_))
        ));
    }

    #[test]
    fn stats_count_entities_and_viewers() {
        let h = Harness::new();
        h.join("v", 1, loc(1.0, 0.0, 0.0));
        h.spawn_text("a", RenderMode::All, loc(0.0, 0.0, 0.0));
        h.spawn_text("b", RenderMode::None, loc(0.0, 0.0, 0.0));
        h.manager.attach("a", 500).unwrap();

        let stats = h.manager.stats();
        assert_eq!(stats.registered_entities, 2);
        assert_eq!(stats.alive_entities, 2);
        assert_eq!(stats.total_viewers, 1);
        assert_eq!(stats.cached_manifests, 1);
    }

    #[test]
    fn copy_spawns_at_source_location() {
        let h = Harness::new();
        let src = h.spawn_text("src", RenderMode::ViewerList, loc(4.0, 5.0, 6.0));
        src.set_scale(3.0, 3.0, 3.0);

        let copy = h.manager.copy("src", "dst", false).unwrap();
        h.scheduler.run_pending();

        assert_eq!(copy.location(), Some(loc(4.0, 5.0, 6.0)));
        assert_eq!(copy.transform(), src.transform());
        assert_eq!(copy.render_mode(), RenderMode::ViewerList);
        assert!(matches!(
            h.manager.copy("src", "dst", false),
            Err(DisplayError::DuplicateId(_))
        ));
        assert!(matches!(
            h.manager.copy("nope", "x", false),
            Err(DisplayError::UnknownEntity(_))
        ));
    }

    #[test]
    fn update_if_exists_applies_and_pushes() {
        let h = Harness::new();
        let v = h.join("v", 1, loc(1.0, 0.0, 0.0));
        h.spawn_text("e1", RenderMode::All, loc(0.0, 0.0, 0.0));
        h.transport.clear();

        assert!(h.manager.update_if_exists("e1", |e| {
            e.set_text("changed");
        }));
        assert!(!h.manager.update_if_exists("missing", |_| {}));

        let last = h.transport.sent_to(&v).pop().unwrap();
        let Packet::EntityMetadata(meta) = last else {
            panic!("expected metadata as the last packet");
        };
        let MetaPayload::Display(display) = meta.meta else {
            panic!("expected display metadata");
        };
        assert!(matches!(
            display.appearance,
            AppearanceMeta::Text { text, .. } if text["text"] == "changed"
        ));
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn persisted_harness() -> (Harness, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Harness::with_store(store.clone()), store)
    }

    #[test]
    fn persistent_spawn_saves_descriptor_with_location() {
        let (h, store) = persisted_harness();
        let e = h.manager.new_display("p1", Appearance::block(5)).unwrap();
        h.manager
            .spawn(e, loc(7.0, 8.0, 9.0), SpawnOptions::persistent())
            .unwrap();

        let saved = store.get("p1").unwrap();
        assert_eq!(saved.location, Some(loc(7.0, 8.0, 9.0)));
        assert_eq!(saved.appearance, Appearance::block(5));
        assert!(h.manager.is_persistent("p1"));
    }

    #[test]
    fn remove_with_drop_deletes_descriptor() {
        let (h, store) = persisted_harness();
        let e = h.manager.new_display("p1", Appearance::block(5)).unwrap();
        h.manager
            .spawn(e, loc(0.0, 0.0, 0.0), SpawnOptions::persistent())
            .unwrap();

        assert!(h.manager.remove("p1", true));
        assert!(!store.contains("p1"));
        assert!(!h.manager.is_persistent("p1"));
    }

    #[test]
    fn remove_without_drop_refreshes_descriptor() {
        let (h, store) = persisted_harness();
        let e = h.manager.new_display("p1", Appearance::text("old")).unwrap();
        let e = h
            .manager
            .spawn(e, loc(0.0, 0.0, 0.0), SpawnOptions::persistent())
            .unwrap();
        h.scheduler.run_pending();
        e.set_text("new");

        assert!(h.manager.remove("p1", false));
        assert_eq!(store.get("p1").unwrap().appearance, Appearance::text("new"));
    }

    #[test]
    fn load_persisted_restores_entities() {
        let (h, store) = persisted_harness();
        let e = h
            .manager
            .new_display("p1", Appearance::text("saved"))
            .unwrap()
            .with_render_mode(RenderMode::ViewerList);
        h.manager
            .spawn(e, loc(1.0, 1.0, 1.0), SpawnOptions::persistent())
            .unwrap();
        h.manager.remove_all(false);
        assert!(store.contains("p1"));

        assert_eq!(h.manager.load_persisted().unwrap(), 1);
        h.scheduler.run_pending();

        let restored = h.manager.get("p1").unwrap();
        assert_eq!(restored.location(), Some(loc(1.0, 1.0, 1.0)));
        assert_eq!(restored.render_mode(), RenderMode::ViewerList);
        assert_eq!(restored.appearance(), Some(Appearance::text("saved")));
        assert!(h.manager.is_persistent("p1"));
    }

    #[test]
    fn removal_before_placement_keeps_stored_location() {
        let (h, store) = persisted_harness();
        let e = h.manager.new_display("p1", Appearance::text("x")).unwrap();
        h.manager
            .spawn(e, loc(3.0, 4.0, 5.0), SpawnOptions::persistent())
            .unwrap();

        assert!(h.manager.remove("p1", false));
        assert_eq!(store.get("p1").unwrap().location, Some(loc(3.0, 4.0, 5.0)));

        h.scheduler.run_pending();
        assert_eq!(h.manager.load_persisted().unwrap(), 1);
    }

    #[test]
    fn remove_all_with_drop_empties_the_store() {
        let (h, store) = persisted_harness();
        let e = h.manager.new_display("p1", Appearance::block(1)).unwrap();
        h.manager
            .spawn(e, loc(0.0, 0.0, 0.0), SpawnOptions::persistent())
            .unwrap();
        let orphan = h
            .manager
            .new_display("orphan", Appearance::block(2))
            .unwrap()
            .descriptor()
            .unwrap();
        store.save(&orphan).unwrap();

        assert_eq!(h.manager.remove_all(true), 1);
        assert!(store.ids().is_empty());
        assert!(!h.manager.is_persistent("p1"));
    }

    #[test]
    fn make_persistent_and_remove_persistence() {
        let (h, store) = persisted_harness();
        h.spawn_text("e1", RenderMode::All, loc(0.0, 0.0, 0.0));

        h.manager.make_persistent("e1").unwrap();
        assert!(store.contains("e1"));

        assert!(h.manager.remove_persistence("e1").unwrap());
        assert!(!store.contains("e1"));
        assert!(!h.manager.is_persistent("e1"));
        assert!(!h.manager.remove_persistence("e1").unwrap());
    }

    #[test]
    fn make_persistent_without_store_fails() {
        let h = Harness::new();
        h.spawn_text("e1", RenderMode::All, loc(0.0, 0.0, 0.0));
        assert!(matches!(
            h.manager.make_persistent("e1"),
            Err(DisplayError::Persistence(_))
        ));
    }

    #[test]
    fn interaction_boxes_are_never_persisted() {
        let (h, store) = persisted_harness();
        let b = h.manager.new_interaction("box", |_| {}).unwrap();
        h.manager
            .spawn(b, loc(0.0, 0.0, 0.0), SpawnOptions::persistent())
            .unwrap();

        assert!(!store.contains("box"));
        assert!(h.manager.make_persistent("box").is_err());
    }

    #[test]
    fn save_persistent_refreshes_all() {
        let (h, store) = persisted_harness();
        let e = h.manager.new_display("p1", Appearance::text("a")).unwrap();
        let e = h
            .manager
            .spawn(e, loc(0.0, 0.0, 0.0), SpawnOptions::persistent())
            .unwrap();
        h.spawn_text("plain", RenderMode::All, loc(0.0, 0.0, 0.0));
        e.set_text("b");

        assert_eq!(h.manager.save_persistent(), 1);
        assert_eq!(store.get("p1").unwrap().appearance, Appearance::text("b"));
        assert!(!store.contains("plain"));
    }

    // -----------------------------------------------------------------------
    // Lifecycle hooks
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl LifecycleHandler for Recorder {
        fn on_join(&self, client: &ClientId) {
            self.events.lock().push(format!("join:{}", client));
        }
        fn on_quit(&self, client: &ClientId) {
            self.events.lock().push(format!("quit:{}", client));
        }
    }

    #[test]
    fn lifecycle_handlers_see_join_and_quit() {
        let h = Harness::new();
        let rec = Arc::new(Recorder::default());
        h.manager.register_lifecycle_handler("widget", rec.clone());

        let p = h.join("p", 1, loc(0.0, 0.0, 0.0));
        h.manager.on_client_quit(&p);
        assert_eq!(*rec.events.lock(), vec!["join:p", "quit:p"]);

        assert!(h.manager.remove_lifecycle_handler("widget"));
        assert!(!h.manager.remove_lifecycle_handler("widget"));
        h.join("q", 2, loc(0.0, 0.0, 0.0));
        assert_eq!(rec.events.lock().len(), 2);
    }

    // -----------------------------------------------------------------------
    // Text animation
    // -----------------------------------------------------------------------

    fn current_text(h: &Harness, id: &str) -> String {
        match h.manager.get(id).and_then(|e| e.appearance()) {
            Some(Appearance::Text(t)) => t.text,
            other => panic!("expected text appearance, got {:?}", other),
        }
    }

    #[test]
    fn animation_rotates_frames_until_cancelled() {
        let h = Harness::new();
        h.spawn_text("e1", RenderMode::All, loc(0.0, 0.0, 0.0));

        h.manager
            .animate("e1", TextAnimation::new(["one", "two", "three"], 5))
            .unwrap();
        h.scheduler.run_pending();
        assert_eq!(current_text(&h, "e1"), "one");
        h.scheduler.advance(5);
        assert_eq!(current_text(&h, "e1"), "two");
        h.scheduler.advance(5);
        assert_eq!(current_text(&h, "e1"), "three");
        h.scheduler.advance(5);
        assert_eq!(current_text(&h, "e1"), "one");

        assert!(h.manager.is_animating("e1"));
        assert!(h.manager.cancel_animation("e1"));
        h.scheduler.advance(5);
        assert_eq!(current_text(&h, "e1"), "one");
        assert!(!h.manager.cancel_animation("e1"));
    }

    #[test]
    fn animation_requires_text_and_frames() {
        let h = Harness::new();
        h.spawn_text("t", RenderMode::All, loc(0.0, 0.0, 0.0));
        let b = h.manager.new_display("b", Appearance::block(1)).unwrap();
        h.manager
            .spawn(b, loc(0.0, 0.0, 0.0), SpawnOptions::default())
            .unwrap();

        assert!(matches!(
            h.manager.animate("b", TextAnimation::new(["x"], 1)),
            Err(DisplayError::NotText(_))
        ));
        assert!(matches!(
            h.manager.animate("t", TextAnimation::new(Vec::<String>::new(), 1)),
            Err(DisplayError::EmptyAnimation(_))
        ));
    }

    #[test]
    fn removing_entity_stops_its_animation() {
        let h = Harness::new();
        h.spawn_text("e1", RenderMode::All, loc(0.0, 0.0, 0.0));
        let handle = h
            .manager
            .animate("e1", TextAnimation::new(["a", "b"], 2))
            .unwrap();

        h.manager.remove("e1", false);
        assert!(handle.is_cancelled());
        assert!(!h.manager.is_animating("e1"));
    }
}
