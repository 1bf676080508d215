// ABOUTME: Integration tests for router role indirection and weighted picking.
// ABOUTME: Property tests cover weight monotonicity and the exact split of production rolls.

mod support;

use cutover::traffic::{Role, RouterError, Slot, Weight};
use proptest::prelude::*;

#[test]
fn blue_starts_active_with_no_standby_traffic() {
    let router = support::router();
    assert_eq!(router.active().id().as_str(), "web-blue");
    assert_eq!(router.standby().id().as_str(), "web-green");
    assert_eq!(router.weight(), Weight::ZERO);
    assert_eq!(router.pool_for(Role::Active).id(), router.pool(Slot::Blue).id());
}

#[test]
fn swap_exchanges_roles_and_resets_weight() {
    let router = support::router();
    router.shift_traffic(100).unwrap();

    let state = router.swap();
    assert_eq!(state.active, Slot::Green);
    assert_eq!(state.weight, Weight::ZERO);
    assert_eq!(router.role_of(router.pool(Slot::Blue).id()), Some(Role::Standby));
    assert_eq!(router.role_of(router.pool(Slot::Green).id()), Some(Role::Active));
}

#[test]
fn weight_only_grows_except_reset_to_zero() {
    let router = support::router();
    router.shift_traffic(30).unwrap();
    assert!(matches!(
        router.shift_traffic(20),
        Err(RouterError::NonMonotonicShift {
            current: 30,
            requested: 20
        })
    ));
    assert_eq!(router.weight().get(), 30);

    router.shift_traffic(0).unwrap();
    router.shift_traffic(10).unwrap();
    assert_eq!(router.weight().get(), 10);
}

#[test]
fn out_of_range_weight_is_rejected() {
    let router = support::router();
    assert!(matches!(
        router.shift_traffic(101),
        Err(RouterError::InvalidWeight(101))
    ));
    assert_eq!(router.weight(), Weight::ZERO);
}

#[test]
fn clones_route_identically() {
    let router = support::router();
    let reader = router.clone();
    router.shift_traffic(40).unwrap();
    assert_eq!(reader.weight().get(), 40);
    assert_eq!(reader.snapshot().standby.as_str(), "web-green");
}

#[test]
fn foreign_pool_has_no_role() {
    let router = support::router();
    let foreign = cutover::types::PoolId::new("other-blue");
    assert!(!router.owns(&foreign));
    assert_eq!(router.role_of(&foreign), None);
}

proptest! {
    #[test]
    fn accepted_weights_never_decrease(requests in proptest::collection::vec(1u32..=100, 1..30)) {
        let router = support::router();
        let mut last = 0u8;
        for weight in requests {
            match router.shift_traffic(weight) {
                Ok(()) => {
                    prop_assert!(router.weight().get() >= last);
                    last = router.weight().get();
                }
                Err(RouterError::NonMonotonicShift { current, .. }) => {
                    prop_assert_eq!(current, last);
                    prop_assert_eq!(router.weight().get(), last);
                }
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }
        }
    }

    #[test]
    fn any_hundred_rolls_split_by_weight(weight in 0u32..=100, start in 0u64..1_000_000_000_000) {
        let router = support::router();
        router.shift_traffic(weight).unwrap();
        let standby = router.standby().id().clone();

        let to_standby = (0..100u64)
            .filter(|i| router.pick(start + *i).id() == &standby)
            .count();
        prop_assert_eq!(to_standby as u32, weight);
    }
}
