mod common;

use common::*;
use strata_rt::{MarshalError, Member, StructureDef, StructureKind, Value};

#[test]
fn test_dense_enumeration_lookup() {
    let mut env = env();
    let pet = enumeration(&mut env, "Pet", &[("Dog", 0), ("Cat", 1)]);
    let dog = env.item(pet, "Dog").unwrap();
    let cat = env.item(pet, "Cat").unwrap();
    assert_eq!(env.call_type(pet, 0).unwrap(), Some(dog));
    assert_eq!(env.call_type(pet, 1).unwrap(), Some(cat));
    assert_eq!(env.call_type(pet, 5).unwrap(), None);
    assert_eq!(env.item_name(cat).unwrap(), "Cat");
    assert_eq!(env.item_value(cat).unwrap(), 1);
    // items are their own value
    assert_eq!(env.value(dog).unwrap(), Value::Object(dog));
}

#[test]
fn test_sparse_enumeration_lookup() {
    let mut env = env();
    let pet = enumeration(&mut env, "Pet", &[("Dog", 123), ("Cat", 456)]);
    let cat = env.item(pet, "Cat").unwrap();
    assert_eq!(env.call_type(pet, 456).unwrap(), Some(cat));
    assert_eq!(env.call_type(pet, 1).unwrap(), None);
    assert_eq!(env.bytes(cat).unwrap(), &456u16.to_le_bytes());
}

#[test]
fn test_enumerations_cannot_be_constructed() {
    let mut env = env();
    let pet = enumeration(&mut env, "Pet", &[("Dog", 0)]);
    assert_eq!(env.construct(pet, None).unwrap_err(), MarshalError::NoNewEnum("Pet".to_string()));
    let errors = error_set(&mut env, "Failure", &[("Timeout", 1)]);
    assert_eq!(
        env.construct(errors, None).unwrap_err(),
        MarshalError::NoNewError("Failure".to_string())
    );
    assert!(matches!(env.item(pet, "Fish"), Err(MarshalError::InvalidEnum { .. })));
}

#[test]
fn test_enumeration_members() {
    let mut env = env();
    let pet = enumeration(&mut env, "Pet", &[("Dog", 123), ("Cat", 456)]);
    let owner = define(
        &mut env,
        StructureDef::new("Owner", StructureKind::Struct, 2, 2),
        vec![Member::enum_item("pet", 0, 16, pet.structure())],
    );
    let object = env.cast_bytes(owner, 123u16.to_le_bytes().to_vec()).unwrap();
    let dog = env.item(pet, "Dog").unwrap();
    let cat = env.item(pet, "Cat").unwrap();
    assert_eq!(env.get(object, "pet").unwrap(), Value::Object(dog));

    env.set(object, "pet", Value::Object(cat)).unwrap();
    assert_eq!(env.get(object, "pet").unwrap(), Value::Object(cat));
    env.set(object, "pet", "Dog").unwrap();
    assert_eq!(env.get(object, "pet").unwrap(), Value::Object(dog));
    env.set(object, "pet", 456).unwrap();
    assert_eq!(env.get(object, "pet").unwrap(), Value::Object(cat));

    assert!(matches!(env.set(object, "pet", 7), Err(MarshalError::InvalidEnum { .. })));
    assert!(matches!(env.set(object, "pet", 1.5), Err(MarshalError::EnumExpected { .. })));

    // a raw value with no item cannot be read back
    env.bytes_mut(object).unwrap().copy_from_slice(&9u16.to_le_bytes());
    assert!(matches!(env.get(object, "pet"), Err(MarshalError::InvalidEnum { .. })));
}

fn result_type(env: &mut strata_rt::Environment) -> (strata_rt::Constructor, strata_rt::Constructor) {
    let failure = error_set(env, "Failure", &[("OutOfMemory", 1), ("Timeout", 2)]);
    let result = define(
        env,
        StructureDef::new("Failure!i32", StructureKind::ErrorUnion, 8, 4),
        vec![
            Member::int("value", 0, 32),
            Member::error("error", 32, 16, failure.structure()),
        ],
    );
    (failure, result)
}

#[test]
fn test_error_union_value_and_error() {
    let mut env = env();
    let (failure, result) = result_type(&mut env);
    let object = env.construct(result, Some(Value::Int(7))).unwrap();
    assert_eq!(env.value(object).unwrap(), Value::Int(7));

    let timeout = env.item(failure, "Timeout").unwrap();
    env.assign(object, Value::Object(timeout)).unwrap();
    match env.value(object) {
        Err(MarshalError::ErrorReturned { name, number, item }) => {
            assert_eq!(name, "Timeout");
            assert_eq!(number, 2);
            assert_eq!(item, timeout);
        }
        other => panic!("expected an error, got {:?}", other),
    }
    // payload is cleared while the error is set
    assert_eq!(&env.bytes(object).unwrap()[..4], &[0; 4]);

    env.assign(object, Value::Int(8)).unwrap();
    assert_eq!(env.value(object).unwrap(), Value::Int(8));
}

#[test]
fn test_error_membership_is_checked() {
    let mut env = env();
    let (_, result) = result_type(&mut env);
    let other = error_set(&mut env, "Other", &[("Broken", 9), ("Slow", 2)]);
    let object = env.construct(result, None).unwrap();

    let broken = env.item(other, "Broken").unwrap();
    assert!(matches!(
        env.assign(object, Value::Object(broken)),
        Err(MarshalError::NotInErrorSet { .. })
    ));

    // errors are matched by number across sets
    let slow = env.item(other, "Slow").unwrap();
    env.assign(object, Value::Object(slow)).unwrap();
    assert!(matches!(
        env.value(object),
        Err(MarshalError::ErrorReturned { number: 2, .. })
    ));
}

#[test]
fn test_failed_error_union_write_keeps_old_value() {
    let mut env = env();
    let (_, result) = result_type(&mut env);
    let other = error_set(&mut env, "Other", &[("Broken", 9)]);
    let object = env.construct(result, Some(Value::Int(7))).unwrap();

    let broken = env.item(other, "Broken").unwrap();
    assert!(env.assign(object, Value::Object(broken)).is_err());
    assert_eq!(env.value(object).unwrap(), Value::Int(7));
    assert!(env.assign(object, Value::Int(1 << 40)).is_err());
    assert_eq!(env.value(object).unwrap(), Value::Int(7));
}

#[test]
fn test_unknown_error_number() {
    let mut env = env();
    let (_, result) = result_type(&mut env);
    let mut bytes = 0i32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[5, 0, 0, 0]);
    let object = env.cast_bytes(result, bytes).unwrap();
    assert_eq!(
        env.value(object).unwrap_err(),
        MarshalError::UnknownErrorNumber {
            structure: "Failure".to_string(),
            number: 5
        }
    );
}
