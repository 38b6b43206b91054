// Include tests
#[cfg(test)]
mod tests {
    use crate::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;
    use world_core::grid::GridState;
    use world_core::spatial::{ObstacleModel, VolumeModel};
    use world_core::{EncounterState, FlatTerrain, GroupId, MapKey, PlayerId, Vec3, WorldPosition};

    const RAID_PERIOD_MS: u64 = 7_200_000;

    fn templates() -> TemplateStore {
        TemplateStore::new([
            MapTemplate::new(0, "Eastern Kingdoms", MapKind::Continent),
            MapTemplate::new(33, "Shadowfang Keep", MapKind::Dungeon).with_encounters(3),
            MapTemplate::new(36, "Deadmines", MapKind::Dungeon).with_reset_delay(5_000),
            MapTemplate::new(43, "Wailing Caverns", MapKind::Dungeon).with_max_players(1),
            MapTemplate::new(409, "Molten Core", MapKind::Raid).with_reset_delay(RAID_PERIOD_MS),
            MapTemplate::new(489, "Warsong Gulch", MapKind::Battleground),
        ])
    }

    fn test_config() -> MapConfig {
        MapConfig {
            map_update_interval_ms: 100,
            instance_unload_delay_ms: 1_000,
            max_persisted_instance_id: 6,
            ..MapConfig::default()
        }
    }

    fn registry_with(config: MapConfig, store: Arc<MemoryInstanceStore>) -> MapRegistry {
        MapRegistry::new(config, templates(), Arc::new(FlatTerrain::new(10.0)), store)
            .expect("Failed to create map registry")
    }

    fn registry() -> MapRegistry {
        registry_with(test_config(), Arc::new(MemoryInstanceStore::new()))
    }

    fn player(name: &str) -> PlayerContext {
        PlayerContext::new(name, WorldPosition::new(100.0, 100.0, 0.0, 0.0))
    }

    fn enter(registry: &MapRegistry, template_id: u32, player: &PlayerContext) -> MapRef {
        let map = registry
            .create_or_get(template_id, Some(player))
            .expect("Failed to resolve map");
        assert!(map.write().add_player(player.clone()));
        map
    }

    fn run_passes(registry: &MapRegistry, passes: usize) {
        for _ in 0..passes {
            assert!(registry.update(100));
        }
    }

    #[test]
    fn test_solo_player_is_bound_to_new_instance() {
        let registry = registry();
        let aria = player("Aria");

        let map = enter(&registry, 33, &aria);
        assert_eq!(map.read().key(), MapKey::new(33, 7));

        let bindings = &registry.context().bindings;
        assert_eq!(
            bindings.player_bind(aria.id, 33),
            Some(InstanceBind { instance_id: 7, permanent: false })
        );
        assert!(bindings.state(7).is_some_and(|state| state.bound_players.contains(&aria.id)));
    }

    #[test]
    #[should_panic(expected = "permanently bound")]
    fn test_permanently_bound_player_cannot_enter_other_instance() {
        let registry = registry();
        let map = enter(&registry, 33, &player("Aria"));

        let bram = player("Bram");
        let bindings = &registry.context().bindings;
        bindings.add_state(33, 8, 0, true);
        bindings.bind_player(bram.id, 33, 8, true);

        map.write().add_player(bram);
    }

    #[test]
    #[should_panic(expected = "is bound to instance 8")]
    fn test_group_bound_elsewhere_cannot_enter() {
        let registry = registry();
        let map = enter(&registry, 33, &player("Aria"));

        let leader = PlayerId::new();
        let group = GroupContext { id: GroupId::new(), leader };
        let bindings = &registry.context().bindings;
        bindings.add_state(33, 8, 0, true);
        bindings.bind_group(group.id, 33, 8, false);

        map.write().add_player(player("Bram").in_group(group));
    }

    #[test]
    fn test_grouped_players_share_instance_and_perm_bind() {
        let registry = registry();
        let leader = player("Leader");
        let group = GroupContext { id: GroupId::new(), leader: leader.id };
        let leader = leader.in_group(group);
        let member = player("Member").in_group(group);

        let map = enter(&registry, 33, &leader);
        let bindings = &registry.context().bindings;
        assert_eq!(bindings.player_bind(leader.id, 33), None);
        assert_eq!(
            bindings.group_bind(group.id, 33),
            Some(InstanceBind { instance_id: 7, permanent: false })
        );

        let joined = enter(&registry, 33, &member);
        assert!(Arc::ptr_eq(&map, &joined));

        map.write().perm_bind_all_players(leader.id);
        assert_eq!(bindings.player_bind(member.id, 33).map(|b| b.permanent), Some(true));
        assert_eq!(bindings.group_bind(group.id, 33).map(|b| b.permanent), Some(true));
        let saves = registry
            .drain_notices()
            .into_iter()
            .filter(|notice| matches!(notice, MapNotice::InstanceSaveCreated { .. }))
            .count();
        assert_eq!(saves, 2);

        // A late member with a stale solo bind is moved onto the group's save.
        bindings.add_state(33, 8, 0, true);
        let late = player("Late").in_group(group);
        bindings.bind_player(late.id, 33, 8, false);
        let resolved = enter(&registry, 33, &late);
        assert!(Arc::ptr_eq(&map, &resolved));
        assert_eq!(
            bindings.player_bind(late.id, 33),
            Some(InstanceBind { instance_id: 7, permanent: true })
        );
        assert!(registry
            .drain_notices()
            .contains(&MapNotice::InstanceSaveCreated { player: late.id, key: MapKey::new(33, 7) }));
    }

    #[test]
    fn test_empty_instance_unloads_exactly_after_delay() {
        let registry = registry();
        let aria = player("Aria");
        let map = enter(&registry, 33, &aria);

        run_passes(&registry, 5);
        assert!(map.write().remove_player(aria.id).is_some());
        drop(map);

        // Below the update interval nothing runs.
        assert!(!registry.update(50));
        assert!(registry.update(50));

        run_passes(&registry, 8);
        assert!(registry.find(33, 7).is_some());
        run_passes(&registry, 1);
        assert!(registry.find(33, 7).is_none());

        // A plain unload keeps the save and the bind.
        assert!(registry.context().bindings.has_state(7));
        assert!(registry.context().bindings.player_bind(aria.id, 33).is_some());
    }

    #[test]
    fn test_continents_never_unload() {
        let registry = registry();
        let map = registry.create_or_get(0, None).unwrap();
        let aria = player("Aria");
        assert!(map.write().add_player(aria.clone()));
        map.write().remove_player(aria.id);

        run_passes(&registry, 50);
        assert!(registry.find(0, 0).is_some());
    }

    #[test]
    fn test_pending_work_delays_unload() {
        let registry = registry();
        let aria = player("Aria");
        let map = enter(&registry, 33, &aria);
        map.write().remove_player(aria.id);
        map.write().begin_async_work();

        run_passes(&registry, 20);
        assert!(registry.find(33, 7).is_some());

        map.write().end_async_work();
        drop(map);
        run_passes(&registry, 9);
        assert!(registry.find(33, 7).is_some());
        run_passes(&registry, 1);
        assert!(registry.find(33, 7).is_none());
    }

    #[test]
    fn test_reset_all_refused_while_occupied() {
        let registry = registry();
        let aria = player("Aria");
        let map = enter(&registry, 33, &aria);

        assert!(!map.write().reset(InstanceResetMethod::All));
        run_passes(&registry, 20);
        assert!(registry.find(33, 7).is_some());
        assert!(!map.read().reset_after_unload());
        assert_eq!(
            registry.drain_notices(),
            vec![MapNotice::ResetFailed { player: aria.id, template_id: 33 }]
        );
    }

    #[test]
    fn test_reset_on_empty_instance_tears_down_next_pass() {
        let registry = registry();
        let aria = player("Aria");
        let map = enter(&registry, 33, &aria);
        map.write().remove_player(aria.id);

        assert!(map.write().reset(InstanceResetMethod::All));
        drop(map);
        run_passes(&registry, 1);

        assert!(registry.find(33, 7).is_none());
        let bindings = &registry.context().bindings;
        assert!(!bindings.has_state(7));
        assert_eq!(bindings.player_bind(aria.id, 33), None);
    }

    #[test]
    fn test_global_reset_on_occupied_instance_defers_to_unload() {
        let registry = registry();
        let aria = player("Aria");
        let map = enter(&registry, 33, &aria);

        assert!(!map.write().reset(InstanceResetMethod::Global));
        assert!(map.read().unload_when_empty());
        assert_eq!(
            registry.drain_notices(),
            vec![MapNotice::InstanceInvalidated { player: aria.id, key: MapKey::new(33, 7) }]
        );

        // The last player leaving unloads right away.
        map.write().remove_player(aria.id);
        assert_eq!(map.read().unload_timer_remaining(), Some(MIN_UNLOAD_DELAY_MS));
        drop(map);
        run_passes(&registry, 1);
        assert!(registry.find(33, 7).is_none());
        assert!(!registry.context().bindings.has_state(7));
    }

    #[test]
    fn test_normal_dungeon_resets_after_delay() {
        let config = MapConfig { instance_unload_delay_ms: 1_000_000, ..test_config() };
        let registry = registry_with(config, Arc::new(MemoryInstanceStore::new()));
        let aria = player("Aria");
        let map = enter(&registry, 36, &aria);
        map.write().remove_player(aria.id);
        drop(map);
        assert_eq!(registry.context().resets.lock().len(), 1);

        run_passes(&registry, 49);
        assert!(registry.find(36, 7).is_some());
        run_passes(&registry, 1);
        assert!(registry.find(36, 7).is_none());
        assert!(!registry.context().bindings.has_state(7));
    }

    #[test]
    fn test_raid_reset_warns_then_invalidates() {
        let registry = registry();
        let aria = player("Aria");
        let map = enter(&registry, 409, &aria);
        let key = map.read().key();

        let mut warnings = Vec::new();
        for _ in 0..120 {
            assert!(registry.update(60_000));
            for notice in registry.drain_notices() {
                match notice {
                    MapNotice::ResetWarning { time_left_ms, .. } => warnings.push(time_left_ms),
                    MapNotice::InstanceInvalidated { player, key: invalidated } => {
                        assert_eq!(player, aria.id);
                        assert_eq!(invalidated, key);
                    }
                    other => panic!("unexpected notice {other:?}"),
                }
            }
        }

        assert_eq!(warnings, vec![3_600_000, 900_000, 300_000]);
        assert!(map.read().reset_after_unload());
        assert_eq!(registry.context().bindings.player_bind(aria.id, 409), None);

        map.write().remove_player(aria.id);
        drop(map);
        assert!(registry.update(60_000));
        assert!(registry.find(key.template_id, key.instance_id).is_none());
        assert!(!registry.context().bindings.has_state(key.instance_id));
    }

    #[test]
    fn test_encounters_saved_and_restored() {
        let store = Arc::new(MemoryInstanceStore::new());
        let registry = registry_with(test_config(), Arc::clone(&store));
        let aria = player("Aria");
        let map = enter(&registry, 33, &aria);

        assert!(map.write().set_encounter(1, EncounterState::InProgress));
        assert!(store.load_encounters(MapKey::new(33, 7)).is_none());
        assert!(map.write().set_encounter(0, EncounterState::Done));
        assert_eq!(store.load_encounters(MapKey::new(33, 7)).as_deref(), Some("3 1 0"));
        assert!(!map.write().set_encounter(3, EncounterState::Done));
        drop(map);

        registry.destroy(33, 7).unwrap();
        assert!(registry.find(33, 7).is_none());

        let restored = registry.create_or_get(33, Some(&aria)).unwrap();
        let restored = restored.read();
        assert_eq!(restored.key(), MapKey::new(33, 7));
        assert_eq!(
            restored.encounters().map(|log| log.states().to_vec()),
            Some(vec![EncounterState::Done, EncounterState::NotStarted, EncounterState::NotStarted])
        );
    }

    #[test]
    fn test_instance_ids_start_after_stored_ones() {
        let store = Arc::new(MemoryInstanceStore::new());
        store.save_encounters(MapKey::new(33, 12), "0 0 0");
        let registry = registry_with(test_config(), store);
        assert_eq!(registry.generate_instance_id(), 13);
        assert_eq!(registry.generate_instance_id(), 14);
    }

    #[test]
    fn test_concurrent_create_or_get_is_unique() {
        let registry = registry();
        let leader = player("Leader");
        let group = GroupContext { id: GroupId::new(), leader: leader.id };
        let instance = enter(&registry, 33, &leader.in_group(group));

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let registry = &registry;
                    scope.spawn(move || {
                        let member = player(&format!("Member{i}")).in_group(group);
                        let continent = registry.create_or_get(0, None).unwrap();
                        let dungeon = registry.create_or_get(33, Some(&member)).unwrap();
                        (continent, dungeon)
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            for (continent, dungeon) in &results {
                assert!(Arc::ptr_eq(continent, &results[0].0));
                assert!(Arc::ptr_eq(dungeon, &instance));
            }
        });
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_parallel_pass_updates_every_map_once() {
        let config = MapConfig { worker_threads: 2, ..test_config() };
        let registry = registry_with(config, Arc::new(MemoryInstanceStore::new()));
        assert!(registry.is_parallel());

        let continent = registry.create_or_get(0, None).unwrap();
        let instances: Vec<MapRef> = (0..3).map(|i| enter(&registry, 33, &player(&format!("P{i}")))).collect();

        let counted = Arc::new(AtomicU32::new(0));
        let hook_counted = Arc::clone(&counted);
        let hook_maps = instances.clone();
        registry.add_post_tick_hook(move |elapsed| {
            assert_eq!(elapsed, 100);
            // Runs after the barrier: every map already has its update.
            for map in &hook_maps {
                assert_eq!(map.read().update_count(), 1);
            }
            hook_counted.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.update(100));
        assert_eq!(counted.load(Ordering::SeqCst), 1);
        assert_eq!(continent.read().update_count(), 1);
        for map in &instances {
            assert_eq!(map.read().update_count(), 1);
        }

        registry.unload_all();
        assert!(registry.is_empty());
        assert!(!registry.is_parallel());
    }

    #[test]
    fn test_battleground_entry() {
        let registry = registry();
        let battleground = registry.create_battleground(489).unwrap();
        let instance_id = battleground.read().key().instance_id;

        let aria = player("Aria").in_battleground(instance_id);
        let entered = registry.create_or_get(489, Some(&aria)).unwrap();
        assert!(Arc::ptr_eq(&battleground, &entered));
        assert!(entered.write().add_player(aria.clone()));
        assert_eq!(registry.context().bindings.player_bind(aria.id, 489), None);

        assert_eq!(registry.create_battleground(33).err(), Some(MapError::InvalidTemplate(33)));
    }

    #[test]
    #[should_panic(expected = "without an instance")]
    fn test_battleground_without_queue_panics() {
        let registry = registry();
        registry.create_battleground(489).unwrap();
        let _ = registry.create_or_get(489, Some(&player("Aria")));
    }

    #[test]
    #[should_panic(expected = "without a requester")]
    fn test_instanceable_without_requester_panics() {
        let registry = registry();
        let _ = registry.create_or_get(33, None);
    }

    #[test]
    fn test_unknown_maps_are_errors() {
        let registry = registry();
        assert_eq!(registry.create_or_get(999, None).err(), Some(MapError::InvalidTemplate(999)));
        assert_eq!(
            registry.destroy(33, 99),
            Err(MapError::NotFound { template_id: 33, instance_id: 99 })
        );
        assert!(registry.find(0, 0).is_none());
    }

    #[test]
    fn test_full_instance_refuses_entry() {
        let registry = registry();
        let map = enter(&registry, 43, &player("Aria"));
        assert!(!map.write().add_player(player("Bram")));
        assert_eq!(map.read().player_count(), 1);
    }

    #[test]
    fn test_forced_grid_survives_cleanup() {
        let config = MapConfig {
            grid_cleanup_interval_ms: 1_000,
            grid_unload_delay_ms: 60_000,
            ..test_config()
        };
        let registry = registry_with(config, Arc::new(MemoryInstanceStore::new()));
        let map = registry.create_or_get(0, None).unwrap();
        let mut map = map.write();

        let aria = player("Aria");
        let bram = PlayerContext::new("Bram", WorldPosition::new(5_000.0, 5_000.0, 0.0, 0.0));
        assert!(map.add_player(aria.clone()));
        assert!(map.add_player(bram.clone()));
        assert!(map.force_load_grid(100.0, 100.0));
        assert_eq!(map.loaded_grid_count(), 2);

        map.remove_player(aria.id);
        map.remove_player(bram.id);
        assert_eq!(map.grid_state(5_000.0, 5_000.0), Some(GridState::Idle));

        for _ in 0..200 {
            map.update(1_000);
        }
        assert!(map.is_loaded(100.0, 100.0));
        assert!(!map.is_removal_grid(100.0, 100.0));
        assert!(!map.is_loaded(5_000.0, 5_000.0));
        assert!(map.is_removal_grid(5_000.0, 5_000.0));

        // Coming back reloads the cell.
        assert!(map.add_player(bram));
        assert_eq!(map.grid_state(5_000.0, 5_000.0), Some(GridState::Active));
    }

    #[test]
    fn test_released_forced_grid_unloads() {
        let config = MapConfig {
            grid_cleanup_interval_ms: 1_000,
            grid_unload_delay_ms: 60_000,
            ..test_config()
        };
        let registry = registry_with(config, Arc::new(MemoryInstanceStore::new()));
        let map = registry.create_or_get(0, None).unwrap();
        let mut map = map.write();

        assert!(map.force_load_grid(100.0, 100.0));
        for _ in 0..120 {
            map.update(1_000);
        }
        assert!(map.is_loaded(100.0, 100.0));

        map.release_grid_lock(100.0, 100.0);
        for _ in 0..120 {
            map.update(1_000);
        }
        assert_eq!(map.grid_state(100.0, 100.0), Some(GridState::Invalid));
        assert!(!map.is_loaded(100.0, 100.0));
        assert_eq!(map.loaded_grid_count(), 0);
    }

    #[test]
    fn test_sweep_releases_table_while_waiting_on_a_map() {
        let registry = Arc::new(registry());
        let map = registry.create_or_get(0, None).unwrap();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (found_tx, found_rx) = mpsc::channel();

        // Holds the map and looks the registry up while the sweep waits on it
        let holder = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let _guard = map.write();
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                found_tx.send(registry.find(0, 0).is_some()).unwrap();
            })
        };
        locked_rx.recv().unwrap();
        let sweeper = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.sweep(100))
        };

        assert_eq!(found_rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        holder.join().unwrap();
        sweeper.join().unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_tick_budget_is_checked_per_map() {
        let registry = registry();
        let maps = vec![
            registry.create_or_get(0, None).unwrap(),
            registry.create_battleground(489).unwrap(),
        ];

        let report = UpdateScheduler::new(0, 60_000).unwrap().run(&maps, 100);
        assert_eq!(report.maps_updated, 2);
        assert_eq!(report.slow_maps, 0);

        // Any measurable update overruns a zero budget
        let report = UpdateScheduler::new(0, 0).unwrap().run(&maps, 100);
        assert_eq!(report.slow_maps, 2);

        let report = UpdateScheduler::new(2, 0).unwrap().run(&maps, 100);
        assert_eq!(report.maps_updated, 2);
        assert_eq!(report.slow_maps, 2);
    }

    #[test]
    fn test_relocation_moves_viewer_between_cells() {
        let registry = registry();
        let map = registry.create_or_get(0, None).unwrap();
        let mut map = map.write();
        let aria = player("Aria");
        map.add_player(aria.clone());

        assert!(map.relocate_player(aria.id, WorldPosition::new(2_000.0, 100.0, 0.0, 0.0)));
        assert_eq!(map.grid_state(100.0, 100.0), Some(GridState::Idle));
        assert_eq!(map.grid_state(2_000.0, 100.0), Some(GridState::Active));
        assert!(!map.relocate_player(PlayerId::new(), WorldPosition::default()));
    }

    #[test]
    fn test_obstacles_block_sight_until_removed() {
        let registry = registry();
        let map = registry.create_or_get(0, None).unwrap();
        let wall = Arc::new(ObstacleModel::boxed(
            "wall",
            Vec3::new(50.0, 0.0, 0.0),
            Vec3::new(1.0, 20.0, 10.0),
        ));
        let handle = wall.handle();

        {
            let mut map = map.write();
            map.add_obstacle(wall);
            assert!(!map.is_in_line_of_sight(Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0)));
            let (hit, position) = map.get_object_hit_pos(Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0), -0.5);
            assert!(hit);
            assert!((position.x - 48.5).abs() < 1e-3);

            assert!(map.queue_obstacle_removal(handle));
            assert!(!map.queue_obstacle_removal(handle));
            assert!(!map.is_in_line_of_sight(Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0)));
        }

        run_passes(&registry, 1);
        let map = map.read();
        assert_eq!(map.obstacle_count(), 0);
        assert!(map.is_in_line_of_sight(Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0)));
    }

    #[test]
    fn test_height_combines_terrain_and_obstacles() {
        let registry = registry();
        let map = registry.create_or_get(0, None).unwrap();
        let mut map = map.write();
        assert_eq!(map.get_height(100.0, 100.0, 50.0), None);

        map.add_player(player("Aria"));
        assert_eq!(map.get_height(100.0, 100.0, 50.0), Some(10.0));

        map.add_obstacle(Arc::new(ObstacleModel::boxed(
            "platform",
            Vec3::new(100.0, 100.0, 20.0),
            Vec3::new(2.0, 2.0, 5.0),
        )));
        let height = map.get_height(100.0, 100.0, 50.0).unwrap();
        assert!((height - 25.0).abs() < 1e-3);
    }

    #[test]
    fn test_unload_all_sends_occupants_home() {
        let registry = registry();
        let aria = player("Aria");
        enter(&registry, 33, &aria);
        registry.create_or_get(0, None).unwrap();

        registry.unload_all();
        assert!(registry.is_empty());
        assert_eq!(
            registry.drain_notices(),
            vec![MapNotice::TeleportToHomebind { player: aria.id, key: MapKey::new(33, 7) }]
        );
    }

    #[test]
    fn test_stats_report_instances() {
        let registry = registry();
        registry.load_continents(&[0, 33]).unwrap();
        enter(&registry, 33, &player("Aria"));

        let stats = registry.stats();
        assert_eq!(stats.live_maps, 2);
        assert_eq!(stats.instances, 1);
        assert_eq!(stats.players_in_instances, 1);
        assert_eq!(stats.bindings.states, 1);
        assert_eq!(stats.bindings.bound_players, 1);
        assert!(stats.to_json().unwrap().contains("\"players_in_instances\":1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_world_server_runs_until_shutdown() {
        let registry = Arc::new(registry());
        registry.load_continents(&[0]).unwrap();
        let shutdown_state = ShutdownState::new();

        let server = WorldServer::new(Arc::clone(&registry), 5);
        let state = shutdown_state.clone();
        let handle = tokio::spawn(async move { server.run(state).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_state.initiate_shutdown();
        handle.await.unwrap().unwrap();

        assert!(shutdown_state.is_shutdown_complete());
        assert!(registry.is_empty());
        assert!(registry.stats().passes > 0);
    }
}
