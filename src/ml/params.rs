// ============================================================
// Layer 5 — Parameter Tree
// ============================================================
// Every layer derives burn's Module, so the tree is walked by
// burn itself: the derive brackets each field with
// enter_module / exit_module, Vec entries enter by index, and
// Option entries enter nothing. Keeping a stack of those names
// gives every parameter its dotted path:
//
//   blocks.3.attention.project_query.weight
//   └────┘ └┘ └───────┘ └───────────┘ └────┘
//   field  idx  child      linear      param
//
// Export is a ModuleVisitor, load is a ModuleMapper. Loading is
// all-or-nothing: the mapper runs on a clone, and the clone
// replaces the model only if every parameter got a value of the
// right shape and no loaded path was left over.

use burn::{
    module::{Module, ModuleMapper, ModuleVisitor, Param},
    prelude::*,
};

use crate::domain::{
    error::BertError,
    state_dict::{ParamData, StateDict},
};

/// State-dict export and import for any burn module.
pub trait Parameterized<B: Backend>: Module<B> {
    /// Every parameter as a backend-free snapshot.
    fn state_dict(&self) -> Result<StateDict, BertError> {
        let mut collector = StateCollector::default();
        Module::visit(self, &mut collector);
        match collector.error {
            Some(e) => Err(e),
            None    => Ok(collector.state),
        }
    }

    /// Replace every parameter from `state`, or change nothing.
    fn load_state_dict(&mut self, state: StateDict) -> Result<(), BertError> {
        let mut loader = StateLoader { path: PathStack::default(), state, missing: Vec::new(), mismatched: None };
        let staged = Module::map(self.clone(), &mut loader);

        let StateLoader { state, missing, mismatched, .. } = loader;
        if !missing.is_empty() || !state.is_empty() {
            return Err(BertError::UnmappedKey {
                unexpected: state.into_keys().collect(),
                missing,
            });
        }
        if let Some(err) = mismatched {
            return Err(err);
        }

        *self = staged;
        Ok(())
    }

    /// Dotted paths in traversal order.
    #[cfg(test)]
    fn parameter_paths(&self) -> Vec<String> {
        let mut names = PathCollector::default();
        Module::visit(self, &mut names);
        names.paths
    }
}

impl<B: Backend, M: Module<B>> Parameterized<B> for M {}

/// Pull a tensor off its device.
pub fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, BertError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| BertError::TensorData(format!("{e:?}")))
}

// ─── Path stack ──────────────────────────────────────────────────────────────
#[derive(Default)]
struct PathStack {
    names: Vec<String>,
}

impl PathStack {
    fn enter(&mut self, name: &str) {
        self.names.push(name.to_string());
    }

    fn exit(&mut self) {
        self.names.pop();
    }

    fn current(&self) -> String {
        self.names.join(".")
    }
}

// ─── Visitors ────────────────────────────────────────────────────────────────
#[derive(Default)]
struct StateCollector {
    path:  PathStack,
    state: StateDict,
    error: Option<BertError>,
}

impl<B: Backend> ModuleVisitor<B> for StateCollector {
    fn enter_module(&mut self, name: &str, _container_type: &str) {
        self.path.enter(name);
    }

    fn exit_module(&mut self, _name: &str, _container_type: &str) {
        self.path.exit();
    }

    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if self.error.is_some() {
            return;
        }
        let tensor = param.val();
        let shape = tensor.dims().to_vec();
        match tensor_values(tensor) {
            Ok(values) => {
                self.state.insert(self.path.current(), ParamData::new(shape, values));
            }
            Err(e) => self.error = Some(e),
        }
    }
}

struct StateLoader {
    path:       PathStack,
    state:      StateDict,
    missing:    Vec<String>,
    mismatched: Option<BertError>,
}

impl<B: Backend> ModuleMapper<B> for StateLoader {
    fn enter_module(&mut self, name: &str, _container_type: &str) {
        self.path.enter(name);
    }

    fn exit_module(&mut self, _name: &str, _container_type: &str) {
        self.path.exit();
    }

    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let path = self.path.current();
        let Some(data) = self.state.remove(&path) else {
            self.missing.push(path);
            return param;
        };

        let dims = param.val().dims();
        if data.shape != dims.to_vec() {
            if self.mismatched.is_none() {
                self.mismatched = Some(BertError::ShapeMismatch {
                    context:  path,
                    expected: dims.to_vec(),
                    actual:   data.shape,
                });
            }
            return param;
        }

        param.map(|tensor| {
            let device = tensor.device();
            Tensor::<B, 1>::from_floats(data.values.as_slice(), &device).reshape(dims)
        })
    }
}

#[cfg(test)]
#[derive(Default)]
struct PathCollector {
    path:  PathStack,
    paths: Vec<String>,
}

#[cfg(test)]
impl<B: Backend> ModuleVisitor<B> for PathCollector {
    fn enter_module(&mut self, name: &str, _container_type: &str) {
        self.path.enter(name);
    }

    fn exit_module(&mut self, _name: &str, _container_type: &str) {
        self.path.exit();
    }

    fn visit_float<const D: usize>(&mut self, _param: &Param<Tensor<B, D>>) {
        self.paths.push(self.path.current());
    }
}
