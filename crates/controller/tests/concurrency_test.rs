mod common;

use std::sync::{Arc, Barrier};

use common::{Harness, TIMEOUT, init_tracing};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use weir_controller::{Error, ServiceNode, ServiceState};
use weir_controller_mock::{DEPENDENT, OTHER_SERVICE, OTHER_SERVICE_2, PASSTHROUGH};

const ITERATIONS: usize = 5_000;

/// Position of a state on the way up. Anything else is a regression.
fn rank(state: ServiceState) -> Option<u8> {
    match state {
        ServiceState::Disabled => Some(0),
        ServiceState::Enabling => Some(1),
        ServiceState::Enabled => Some(2),
        ServiceState::Disabling => None,
    }
}

/// Records every state `node` publishes until it is enabled. The receiver is
/// handed back so the caller can check that nothing was published afterwards.
fn record_until_enabled(
    node: &Arc<ServiceNode>,
) -> JoinHandle<(Vec<ServiceState>, watch::Receiver<ServiceState>)> {
    let mut states = node.subscribe();
    tokio::spawn(async move {
        let mut observed = vec![*states.borrow_and_update()];
        while observed.last() != Some(&ServiceState::Enabled) {
            if states.changed().await.is_err() {
                break;
            }
            observed.push(*states.borrow_and_update());
        }
        (observed, states)
    })
}

/// Two callers enabling the same referencing services must never leave one of
/// them disabled.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enable_referencing_services() {
    init_tracing();

    for iteration in 0..ITERATIONS {
        let h = Harness::new();
        let s4 = h.create(PASSTHROUGH, "4");
        let s2 = h.create(DEPENDENT, "2");
        let s1 = h.create(DEPENDENT, "1");
        let s3 = h.create(DEPENDENT, "3");
        h.reference(&s1, OTHER_SERVICE, &s2);
        h.reference(&s2, OTHER_SERVICE, &s4);
        h.reference(&s3, OTHER_SERVICE, &s2);
        h.reference(&s3, OTHER_SERVICE_2, &s4);

        h.provider
            .enable_controller_service(s4.id())
            .unwrap()
            .wait()
            .await;
        assert_eq!(s4.state(), ServiceState::Enabled);

        let nodes = [&s1, &s2, &s3];
        let mut root_states = s4.subscribe();
        root_states.borrow_and_update();
        let recorders: Vec<_> = nodes.iter().map(|node| record_until_enabled(node)).collect();

        let barrier = Arc::new(Barrier::new(2));
        let callers: Vec<_> = (0..2)
            .map(|_| {
                let provider = h.provider.clone();
                let barrier = Arc::clone(&barrier);
                let root = s4.id().clone();
                tokio::task::spawn_blocking(move || {
                    barrier.wait();
                    provider.enable_referencing_services(&root)
                })
            })
            .collect();

        // Poll while the callers run and the services come up: every sample
        // is on the way up and a service never falls back once enabled
        let mut reached = [false; 3];
        let converged = tokio::time::timeout(TIMEOUT, async {
            loop {
                for (index, node) in nodes.iter().enumerate() {
                    let state = node.state();
                    assert!(
                        rank(state).is_some(),
                        "iteration {iteration}: service {} is {state}",
                        node.id()
                    );
                    assert!(
                        !reached[index] || state == ServiceState::Enabled,
                        "iteration {iteration}: service {} left ENABLED for {state}",
                        node.id()
                    );
                    reached[index] = state == ServiceState::Enabled;
                }
                if reached.iter().all(|enabled| *enabled) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(
            converged.is_ok(),
            "iteration {iteration}: services stuck in {:?}",
            nodes.map(|node| (node.state(), node.fault()))
        );

        let mut initiated = Vec::new();
        for caller in callers {
            initiated.extend(caller.await.unwrap().unwrap());
        }
        initiated.sort();
        assert_eq!(
            initiated,
            vec![s1.id().clone(), s2.id().clone(), s3.id().clone()],
            "iteration {iteration}: each service is claimed by exactly one caller"
        );

        for (node, recorder) in nodes.iter().zip(recorders) {
            let (observed, states) = recorder.await.unwrap();
            assert!(
                observed
                    .windows(2)
                    .all(|pair| matches!((rank(pair[0]), rank(pair[1])), (Some(a), Some(b)) if a <= b)),
                "iteration {iteration}: service {} went {observed:?}",
                node.id()
            );
            assert_eq!(observed.last(), Some(&ServiceState::Enabled));
            assert!(
                !states.has_changed().unwrap(),
                "iteration {iteration}: service {} changed after it was enabled",
                node.id()
            );
            assert!(node.fault().is_none());
            assert_eq!(h.activations(node.id()), 1);
        }
        assert!(!root_states.has_changed().unwrap());
    }
}

/// Many callers enabling the same diamond activate each service once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_bulk_enables() {
    init_tracing();

    for iteration in 0..200 {
        let h = Harness::new();
        let d = h.create(PASSTHROUGH, "D");
        let b = h.create(DEPENDENT, "B");
        let c = h.create(DEPENDENT, "C");
        let a = h.create(DEPENDENT, "A");
        h.reference(&b, OTHER_SERVICE, &d);
        h.reference(&c, OTHER_SERVICE, &d);
        h.reference(&a, OTHER_SERVICE, &b);
        h.reference(&a, OTHER_SERVICE_2, &c);

        let all = vec![a.id().clone(), b.id().clone(), c.id().clone(), d.id().clone()];
        let barrier = Arc::new(Barrier::new(8));
        let callers: Vec<_> = (0..8)
            .map(|_| {
                let provider = h.provider.clone();
                let barrier = Arc::clone(&barrier);
                let all = all.clone();
                tokio::task::spawn_blocking(move || {
                    barrier.wait();
                    provider.enable_controller_services(&all)
                })
            })
            .collect();

        for caller in callers {
            caller.await.unwrap().unwrap();
        }

        for node in [&a, &b, &c, &d] {
            assert!(
                node.await_state(ServiceState::Enabled, TIMEOUT).await,
                "iteration {iteration}: service {} stuck in {}",
                node.id(),
                node.state()
            );
            assert_eq!(h.activations(node.id()), 1);
        }
    }
}

/// Enabling a dependent while its dependency is being disabled never ends
/// with the dependent enabled on top of a disabled dependency.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_enable_racing_disable() {
    init_tracing();

    for iteration in 0..1_000 {
        let h = Harness::new();
        let b = h.create(PASSTHROUGH, "B");
        let a = h.create(DEPENDENT, "A");
        h.reference(&a, OTHER_SERVICE, &b);
        h.provider
            .enable_controller_service(b.id())
            .unwrap()
            .wait()
            .await;
        let mut b_states = b.subscribe();
        b_states.borrow_and_update();

        let barrier = Arc::new(Barrier::new(2));
        let enabling = {
            let provider = h.provider.clone();
            let barrier = Arc::clone(&barrier);
            let id = a.id().clone();
            tokio::task::spawn_blocking(move || {
                barrier.wait();
                provider.enable_controller_service(&id)
            })
        };
        let disabling = {
            let provider = h.provider.clone();
            let barrier = Arc::clone(&barrier);
            let id = b.id().clone();
            tokio::task::spawn_blocking(move || {
                barrier.wait();
                provider.disable_controller_service(&id)
            })
        };

        let enabled = match enabling.await.unwrap() {
            Ok(handle) => {
                handle.wait().await;
                true
            }
            Err(error) => {
                assert!(matches!(error, Error::InvalidState { .. }), "{error}");
                false
            }
        };
        match disabling.await.unwrap() {
            Ok(handle) => {
                handle.wait().await;
            }
            Err(error) => {
                assert!(matches!(error, Error::ActiveReferrer { .. }), "{error}");
                assert!(
                    !b_states.has_changed().unwrap(),
                    "iteration {iteration}: a refused disable changed B"
                );
            }
        }

        // An accepted enable is never undone by the racing disable
        if enabled {
            assert_eq!(a.state(), ServiceState::Enabled, "iteration {iteration}: {:?}", a.fault());
            assert!(a.fault().is_none());
        }

        assert!(
            !(a.state() == ServiceState::Enabled && b.state() != ServiceState::Enabled),
            "iteration {iteration}: A is {} while B is {}",
            a.state(),
            b.state()
        );
        assert!(!a.state().is_transient());
        assert!(!b.state().is_transient());
    }
}
