use std::sync::Arc;
use std::thread;

use sqlgate_lib::{AdminConsole, ConnectionContext, SessionId, SessionRegistry};

#[test]
fn test_concurrent_insert_then_partial_removal() {
    let registry: SessionRegistry<usize> = SessionRegistry::new();
    let ids: Vec<SessionId> = (0..64).map(|_| SessionId::new()).collect();

    thread::scope(|scope| {
        for chunk in ids.chunks(8) {
            let registry = &registry;
            scope.spawn(move || {
                for (i, id) in chunk.iter().enumerate() {
                    registry.insert(*id, i);
                }
            });
        }
    });
    assert_eq!(registry.len(), ids.len());

    let order_before = registry.ids();
    let removed: Vec<SessionId> = ids.iter().copied().step_by(3).collect();

    thread::scope(|scope| {
        for chunk in removed.chunks(4) {
            let registry = &registry;
            scope.spawn(move || {
                for id in chunk {
                    assert!(registry.remove(*id).is_some());
                }
            });
        }
    });

    let expected: Vec<SessionId> = order_before
        .into_iter()
        .filter(|id| !removed.contains(id))
        .collect();
    assert_eq!(registry.ids(), expected);
}

#[test]
fn test_console_sessions_from_many_threads() {
    let console = Arc::new(AdminConsole::new("cli", &[]));

    let kept: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let console = Arc::clone(&console);
                scope.spawn(move || {
                    let mut kept = Vec::new();
                    for i in 0..10 {
                        let session = console.open_session(&ConnectionContext::default());
                        if i % 2 == 0 {
                            kept.push(session);
                        }
                    }
                    kept
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    // Dropped sessions unregistered themselves
    assert!(kept.iter().all(|s| console.registry().contains(s.id())));
    assert_eq!(console.registry().len(), 40);

    drop(kept);
    assert!(console.registry().is_empty());
}
