//! Randomized operation schedules against the lifecycle-set invariants.

use manifold_core::{ConnectionManager, Endpoint, HandlerSpec, ManagerConfig};
use manifold_harness::{ScriptedFactory, VirtualSelector, check_lifecycle_sets};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    BindStream,
    ConnectQueue,
    Process,
    Close(usize),
    CloseFlush(usize),
    Cleanup,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::BindStream),
        Just(Op::ConnectQueue),
        Just(Op::Process),
        any::<usize>().prop_map(Op::Close),
        any::<usize>().prop_map(Op::CloseFlush),
        Just(Op::Cleanup),
    ]
}

proptest! {
    #[test]
    fn lifecycle_sets_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let factory = ScriptedFactory::new();
        let mut manager = ConnectionManager::new(
            VirtualSelector::new(),
            Box::new(factory.clone()),
            ManagerConfig::default(),
        );
        let mut ids = Vec::new();

        for op in ops {
            match op {
                Op::BindStream => {
                    let id = manager
                        .bind("127.0.0.1", &Endpoint::Port(5555), HandlerSpec::Default)
                        .unwrap();
                    ids.push(id);
                }
                Op::ConnectQueue => {
                    let endpoint = Endpoint::SocketType("dealer".to_string());
                    let id = manager
                        .connect("tcp://broker", &endpoint, HandlerSpec::Default)
                        .unwrap();
                    ids.push(id);
                }
                Op::Process => manager.process(),
                Op::Close(seed) => {
                    if !ids.is_empty() {
                        manager.close_connection(ids[seed % ids.len()], false, None);
                    }
                }
                Op::CloseFlush(seed) => {
                    if !ids.is_empty() {
                        manager.close_connection(ids[seed % ids.len()], true, None);
                    }
                }
                Op::Cleanup => manager.cleanup(),
            }
            prop_assert!(check_lifecycle_sets(&manager).is_ok());
        }
    }
}
