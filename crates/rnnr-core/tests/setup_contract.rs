//! What the engine asks of a backend during setup and run.

mod common;

use common::*;
use proptest::prelude::*;
use rnnr_backends::WorkSize;
use rnnr_core::{normalize_launch, Error, Model, ModelState, Program};

fn writes_to(calls: &CallLog, buffer: rnnr_backends::BufferHandle) -> usize {
    calls
        .lock()
        .iter()
        .filter(|call| matches!(call, Call::Write { buffer: b, .. } if *b == buffer))
        .count()
}

#[test]
fn test_setup_order_and_flags() {
    let (backend, calls) = RecordingBackend::new(add_backend());
    let mut model = Model::new(Box::new(backend), add_program());
    model.setup(&add_weights()).unwrap();

    let bytes = ELEMENTS * 4;
    let b = model.buffer("b").unwrap();
    assert_eq!(
        *calls.lock(),
        vec![
            Call::Setup,
            Call::CreateBuffer { byte_size: bytes, writable: false },
            Call::Write { buffer: b, len: ELEMENTS },
            Call::CreateBuffer { byte_size: bytes, writable: false },
            Call::CreateBuffer { byte_size: bytes, writable: true },
            Call::CreateKernel("add".to_string()),
        ]
    );
}

#[test]
fn test_weights_uploaded_exactly_once() {
    let (backend, calls) = RecordingBackend::new(add_backend());
    let mut model = Model::new(Box::new(backend), add_program());
    model.setup(&add_weights()).unwrap();
    for _ in 0..3 {
        model.run(&ramp()).unwrap();
    }

    assert_eq!(writes_to(&calls, model.buffer("b").unwrap()), 1);
    assert_eq!(writes_to(&calls, model.buffer("input").unwrap()), 3);
    let compiles = calls.lock().iter().filter(|c| matches!(c, Call::CreateKernel(_))).count();
    assert_eq!(compiles, 1);
}

#[test]
fn test_wrong_input_length_never_reaches_backend() {
    let (backend, calls) = RecordingBackend::new(add_backend());
    let mut model = Model::new(Box::new(backend), add_program());
    model.setup(&add_weights()).unwrap();
    let before = calls.lock().len();

    let err = model.run(&ramp()[..ELEMENTS - 1]).unwrap_err();
    assert!(matches!(err, Error::InputLength { expected: ELEMENTS, actual } if actual == ELEMENTS - 1));
    assert_eq!(calls.lock().len(), before);
    assert_eq!(model.state(), ModelState::Ready);
}

#[test]
fn test_unresolved_buffer_is_not_dispatched() {
    let json = add_program_json(r#"["outputs", "b", "input"]"#).replace(
        r#""statements":["#,
        r#""statements":[{"kernel":"add","args":["outputs","b","input"],"global_size":[1024],"local_size":[1]},{"kernel":"add","args":["outputs","nope","input"],"global_size":[1024],"local_size":[1]},"#,
    );
    let program = Program::from_json(json.as_bytes()).unwrap();
    assert_eq!(program.statements().len(), 3);

    let (backend, calls) = RecordingBackend::new(add_backend());
    let mut model = Model::new(Box::new(backend), program);
    model.setup(&add_weights()).unwrap();

    let err = model.run(&ramp()).unwrap_err();
    assert!(matches!(err, Error::UnresolvedBufferReference { statement: 1, ref key } if key == "nope"));
    assert_eq!(err.statement(), Some(1));

    // only the first statement reached the backend and no output was read
    let log = calls.lock();
    assert_eq!(log.iter().filter(|c| matches!(c, Call::Run { .. })).count(), 1);
    assert!(!log.iter().any(|c| matches!(c, Call::Read { .. })));
    drop(log);
    assert_eq!(model.state(), ModelState::Ready);
}

#[test]
fn test_unresolved_kernel_is_not_dispatched() {
    let json = add_program_json(r#"["outputs", "b", "input"]"#).replace(r#""kernel":"add""#, r#""kernel":"mul""#);
    let (backend, calls) = RecordingBackend::new(add_backend());
    let mut model = Model::new(Box::new(backend), Program::from_json(json.as_bytes()).unwrap());
    model.setup(&add_weights()).unwrap();

    assert!(matches!(
        model.run(&ramp()),
        Err(Error::UnresolvedKernelReference { statement: 0, ref kernel }) if kernel == "mul"
    ));
    assert!(!calls.lock().iter().any(|c| matches!(c, Call::Run { .. })));
}

#[test]
fn test_setup_failure_faults_model() {
    let (backend, calls) = RecordingBackend::new(add_backend());
    let mut model = Model::new(Box::new(backend), add_program());
    let empty = rnnr_core::WeightStore::from_bytes(rnnr_core::WeightWriter::new().to_bytes().unwrap()).unwrap();

    assert!(matches!(model.setup(&empty), Err(Error::UnknownTensor(ref name)) if name == "b"));
    assert_eq!(model.state(), ModelState::Faulted);
    assert!(matches!(model.setup(&add_weights()), Err(Error::InvalidState { .. })));
    assert!(matches!(
        model.run(&ramp()),
        Err(Error::InvalidState { actual: ModelState::Faulted, .. })
    ));
    // the failed weight lookup stopped setup before any kernel was compiled
    assert!(!calls.lock().iter().any(|c| matches!(c, Call::CreateKernel(_))));
}

fn dims() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..64, 0..=3)
}

proptest! {
    #[test]
    fn normalized_global_is_groups_times_local(global in dims(), local in dims()) {
        let launch = normalize_launch(
            WorkSize::from_dims(&global).unwrap(),
            WorkSize::from_dims(&local).unwrap(),
        );
        for dim in 0..3 {
            let g = global.get(dim).copied().unwrap_or(1);
            let l = local.get(dim).copied().unwrap_or(1);
            prop_assert_eq!(launch.global.as_array()[dim], g * l);
            prop_assert_eq!(launch.local.as_array()[dim], l);
        }
        prop_assert!(launch.validate().is_ok());
    }

    #[test]
    fn more_than_three_dims_are_rejected(extra in prop::collection::vec(1u64..8, 4..8)) {
        prop_assert!(WorkSize::from_dims(&extra).is_none());
    }
}
