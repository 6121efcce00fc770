// Model-checks the grace-period engine's two-phase parity flip and a
// reduced single-bucket LFHT under loom's bounded interleaving exploration.
// Full split-ordered resizing is too large a state space for loom to cover
// exhaustively; see tests/lfht_stress.rs for wall-clock coverage of that.
//
//      $ RUSTFLAGS='--cfg loom' cargo test --test loom --release

#[cfg(loom)]
#[cfg(test)]
mod loom_tests {
    use loom::sync::atomic::{AtomicUsize, Ordering};
    use loom::sync::Arc;
    use loom::thread;
    use qsbr_rcu::config::Flags;
    use qsbr_rcu::gp::GpEngine;
    use qsbr_rcu::lfht::Lfht;

    #[test]
    fn synchronize_observes_all_pre_existing_readers() {
        loom::model(|| {
            let engine = GpEngine::new();
            let reader = engine.register_reader();
            let seen = Arc::new(AtomicUsize::new(0));

            let seen2 = Arc::clone(&seen);
            let handle = thread::spawn(move || {
                let _g = reader.read_lock();
                seen2.store(1, Ordering::Release);
            });

            engine.synchronize();
            handle.join().unwrap();
            assert_eq!(seen.load(Ordering::Acquire), 1);
        });
    }

    #[test]
    fn single_bucket_add_and_lookup_across_threads() {
        loom::model(|| {
            let engine = Arc::new(GpEngine::new());
            let table: Arc<Lfht<u32, u32, Arc<GpEngine>>> = Arc::new(
                Lfht::create(
                    Arc::clone(&engine),
                    |k, _seed| *k as u64,
                    |a, b| a == b,
                    0,
                    0,
                    Flags::empty(),
                    (),
                )
                .unwrap(),
            );

            let t2 = Arc::clone(&table);
            let writer = thread::spawn(move || {
                t2.add(1, 100);
            });

            let reader_result;
            {
                let t3 = Arc::clone(&table);
                reader_result = thread::spawn(move || t3.lookup(&1).map(|it| *it.value()))
                    .join()
                    .unwrap();
            }

            writer.join().unwrap();
            // The reader may run before or after the writer; either None or
            // Some(100) is a valid observation, never a torn/garbage value.
            assert!(reader_result == None || reader_result == Some(100));
            assert_eq!(table.lookup(&1).map(|it| *it.value()), Some(100));
        });
    }

    #[test]
    fn del_then_lookup_never_observes_a_freed_node() {
        loom::model(|| {
            let engine = Arc::new(GpEngine::new());
            let table: Arc<Lfht<u32, u32, Arc<GpEngine>>> = Arc::new(
                Lfht::create(
                    Arc::clone(&engine),
                    |k, _seed| *k as u64,
                    |a, b| a == b,
                    0,
                    0,
                    Flags::empty(),
                    (),
                )
                .unwrap(),
            );
            table.add(7, 70);

            let t2 = Arc::clone(&table);
            let engine2 = Arc::clone(&engine);
            let deleter = thread::spawn(move || {
                if let Some(it) = t2.lookup(&7) {
                    if let Ok(old) = t2.del(it) {
                        engine2.defer(move || old.release());
                    }
                }
            });

            let t3 = Arc::clone(&table);
            let reader = thread::spawn(move || {
                let _ = t3.lookup(&7);
            });

            deleter.join().unwrap();
            reader.join().unwrap();
        });
    }
}
