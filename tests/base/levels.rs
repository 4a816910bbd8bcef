//! Integration tests for registration levels and index queries

use std::sync::Arc;

use trellis_base::{BaseIndex, BaseIndexOptions, IndexingLevel};
use trellis_foundation::{ErrorKind, ObjectId, Value, ValueKind};
use trellis_model::{ClassId, FeatureId, Metamodel, ModelHandle, ResourceId};

struct Company {
    model: ModelHandle,
    res: ResourceId,
    employee: ClassId,
    manager: ClassId,
    boss: FeatureId,
    salary: FeatureId,
}

fn company() -> Company {
    let mut b = Metamodel::builder();
    let employee = b.class("Employee", &[]);
    let manager = b.class("Manager", &[employee]);
    let int = b.data_type("Int", ValueKind::Int);
    let boss = b.reference(employee, "boss", manager, false);
    let salary = b.attribute(employee, "salary", int, false);
    let model = ModelHandle::new(Arc::new(b.build().unwrap()));
    let res = model.create_resource("hr");
    Company {
        model,
        res,
        employee,
        manager,
        boss,
        salary,
    }
}

fn hire(c: &Company, class: ClassId, salary: i64) -> ObjectId {
    let o = c.model.create_object(c.res, class).unwrap();
    c.model.add_value(o, c.salary, salary).unwrap();
    o
}

// =============================================================================
// Levels
// =============================================================================

#[test]
fn statistics_count_without_storing_instances() {
    let c = company();
    hire(&c, c.employee, 10);
    hire(&c, c.manager, 20);
    let index = BaseIndex::new(&c.model, BaseIndexOptions::default());
    index.add_root(c.res).unwrap();
    index.register_classes(&[c.employee], IndexingLevel::Statistics).unwrap();

    assert_eq!(index.count_all_instances(c.employee).unwrap(), 2);
    let err = index.all_instances(c.employee).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IllegalInputKey(_)));

    index.register_classes(&[c.employee], IndexingLevel::Full).unwrap();
    assert_eq!(index.all_instances(c.employee).unwrap().len(), 2);
    assert_eq!(index.class_indexing_level(c.employee), IndexingLevel::Full);
}

#[test]
fn registration_levels_merge() {
    let c = company();
    let index = BaseIndex::new(&c.model, BaseIndexOptions::default());
    index.register_classes(&[c.manager], IndexingLevel::Statistics).unwrap();
    index.register_classes(&[c.manager], IndexingLevel::Notifications).unwrap();
    assert_eq!(index.class_indexing_level(c.manager), IndexingLevel::Both);
}

#[test]
fn feature_lookups_in_both_directions() {
    let c = company();
    let m = hire(&c, c.manager, 30);
    let e1 = hire(&c, c.employee, 10);
    let e2 = hire(&c, c.employee, 10);
    c.model.add_value(e1, c.boss, m).unwrap();
    c.model.add_value(e2, c.boss, m).unwrap();

    let index = BaseIndex::new(&c.model, BaseIndexOptions::default());
    index.add_root(c.res).unwrap();
    index.register_features(&[c.boss, c.salary], IndexingLevel::Full).unwrap();

    assert_eq!(index.find_by_feature_value(&Value::Object(m), c.boss).unwrap(), vec![e1, e2]);
    assert_eq!(index.feature_targets(e1, c.boss).unwrap(), vec![Value::Object(m)]);
    assert!(index.has_feature_value(e2, c.salary, &Value::Int(10)).unwrap());
    assert_eq!(index.count_features(c.boss).unwrap(), 2);
    assert_eq!(index.feature_instances(c.salary).unwrap().len(), 3);

    c.model.set_value(e2, c.boss, None).unwrap();
    assert_eq!(index.find_by_feature_value(&Value::Object(m), c.boss).unwrap(), vec![e1]);
}

#[test]
fn objects_of_unobserved_resources_are_ignored() {
    let c = company();
    let other = c.model.create_resource("other");
    let index = BaseIndex::new(&c.model, BaseIndexOptions::wildcard());
    index.add_root(c.res).unwrap();
    hire(&c, c.employee, 1);
    c.model.create_object(other, c.employee).unwrap();
    assert_eq!(index.count_all_instances(c.employee).unwrap(), 1);

    index.add_root(other).unwrap();
    assert_eq!(index.count_all_instances(c.employee).unwrap(), 2);
    assert_eq!(index.roots().len(), 2);
}

#[test]
fn disposed_index_rejects_queries() {
    let c = company();
    let index = BaseIndex::new(&c.model, BaseIndexOptions::wildcard());
    index.dispose().unwrap();
    assert!(index.is_disposed());
    assert!(matches!(index.add_root(c.res).unwrap_err().kind, ErrorKind::Disposed));
}
