use super::collision_index::FeatureKey;
use std::collections::HashMap;

/// Restricts collision tests to features inserted under one group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPredicate {
    group_id: u32,
}

impl GroupPredicate {
    pub fn matches(&self, key: &FeatureKey) -> bool {
        key.collision_group_id == self.group_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionGroup {
    pub id: u32,
    /// `None` collides with everything.
    pub predicate: Option<GroupPredicate>,
}

impl CollisionGroup {
    pub const SHARED: CollisionGroup = CollisionGroup {
        id: 0,
        predicate: None,
    };
}

/// Partitions labels into collision groups, one per source unless
/// cross-source collisions are enabled.
#[derive(Debug, Clone)]
pub struct CollisionGroups {
    cross_source_collisions: bool,
    max_group_id: u32,
    groups: HashMap<String, CollisionGroup>,
}

impl CollisionGroups {
    pub fn new(cross_source_collisions: bool) -> Self {
        Self {
            cross_source_collisions,
            max_group_id: 0,
            groups: HashMap::new(),
        }
    }

    pub fn get(&mut self, source_id: &str) -> CollisionGroup {
        if self.cross_source_collisions {
            return CollisionGroup::SHARED;
        }
        if let Some(group) = self.groups.get(source_id) {
            return *group;
        }
        self.max_group_id += 1;
        let id = self.max_group_id;
        let group = CollisionGroup {
            id,
            predicate: Some(GroupPredicate { group_id: id }),
        };
        self.groups.insert(source_id.to_string(), group);
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(group: u32) -> FeatureKey {
        FeatureKey {
            bucket_instance_id: 1,
            feature_index: 0,
            collision_group_id: group,
        }
    }

    #[test]
    fn ids_follow_first_seen_order() {
        let mut groups = CollisionGroups::new(false);
        let b = groups.get("zeta");
        let a = groups.get("alpha");
        assert_eq!(b.id, 1);
        assert_eq!(a.id, 2);
        assert_eq!(groups.get("zeta"), b);
    }

    #[test]
    fn predicate_matches_own_group_only() {
        let mut groups = CollisionGroups::new(false);
        let group = groups.get("a");
        let predicate = group.predicate.expect("isolated groups carry a predicate");
        assert!(predicate.matches(&key(1)));
        assert!(!predicate.matches(&key(2)));
    }

    #[test]
    fn cross_source_returns_shared_group() {
        let mut groups = CollisionGroups::new(true);
        assert_eq!(groups.get("a"), CollisionGroup::SHARED);
        assert_eq!(groups.get("b").predicate, None);
    }
}
