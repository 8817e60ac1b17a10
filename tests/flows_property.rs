//! Property tests over the type model and branch wiring.

use proptest::prelude::*;
use weftflow::properties::PropertyType;
use weftflow::steps::{BRANCH_NEXT, BranchingStep, Step};

fn scalar_type() -> impl Strategy<Value = PropertyType> {
    prop_oneof![
        Just(PropertyType::String),
        Just(PropertyType::Integer),
        Just(PropertyType::Float),
        Just(PropertyType::Boolean),
        Just(PropertyType::List),
        Just(PropertyType::Dict),
        Just(PropertyType::Null),
        Just(PropertyType::Any),
    ]
}

proptest! {
    /// Castability is reflexive.
    #[test]
    fn castability_is_reflexive(ty in scalar_type()) {
        prop_assert!(ty.is_castable_to(&ty));
    }

    /// `any` accepts and provides everything.
    #[test]
    fn any_is_a_two_way_escape_hatch(ty in scalar_type()) {
        prop_assert!(ty.is_castable_to(&PropertyType::Any));
        prop_assert!(PropertyType::Any.is_castable_to(&ty));
    }

    /// Exactly the stringifiable scalars (and `any`) fit a string slot.
    #[test]
    fn only_scalars_stringify(ty in scalar_type()) {
        let fits = ty.is_castable_to(&PropertyType::String);
        let expected = matches!(
            ty,
            PropertyType::String
                | PropertyType::Integer
                | PropertyType::Float
                | PropertyType::Boolean
                | PropertyType::Any
        );
        prop_assert_eq!(fits, expected);
    }

    /// A union source must fit memberwise; a union target needs one fit.
    #[test]
    fn union_casts_follow_members(a in scalar_type(), b in scalar_type()) {
        let union = PropertyType::Union(vec![a.clone(), b.clone()]);
        for target in [PropertyType::String, PropertyType::Boolean, PropertyType::List] {
            let expected = a.is_castable_to(&target) && b.is_castable_to(&target);
            prop_assert_eq!(union.is_castable_to(&target), expected);
        }
        for source in [PropertyType::Integer, PropertyType::Null] {
            let expected = source.is_castable_to(&a) || source.is_castable_to(&b);
            prop_assert_eq!(source.is_castable_to(&union), expected);
        }
    }

    /// Every mapping target appears in the branch set, plus the default.
    #[test]
    fn branching_steps_declare_all_targets(
        mapping in proptest::collection::hash_map("[a-z]{1,8}", "[a-z]{1,8}", 0..6)
    ) {
        let step = BranchingStep::new(mapping.clone());
        let branches = step.branches();
        prop_assert!(branches.iter().any(|b| b == BRANCH_NEXT));
        for target in mapping.values() {
            prop_assert!(branches.iter().any(|b| b == target));
        }
        // Exactly once each.
        let mut sorted = branches.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(sorted.len(), branches.len());
    }
}
