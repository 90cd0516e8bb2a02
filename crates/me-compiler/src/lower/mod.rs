//! Lowering of decomposed graphs to MLIR dialects.

pub mod mhlo;
pub mod tosa;

use std::collections::HashMap;

use me_tensor::{DType, Shape};

use crate::error::CompileError;
use crate::graph::{Graph, Node, NodeId, Op};
use crate::mlir::{self, Func, Stmt};

/// Name of the traced entry point, as torch-mlir names it.
pub const ENTRY_POINT: &str = "forward";

/// Accumulates the body of the entry function while a graph is lowered.
pub(crate) struct FuncBuilder<'g> {
    graph: &'g Graph,
    dialect: &'static str,
    names: HashMap<NodeId, String>,
    body: Vec<Stmt>,
    next: usize,
}

impl<'g> FuncBuilder<'g> {
    pub(crate) fn new(graph: &'g Graph, dialect: &'static str) -> Self {
        let names = graph
            .parameters()
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, format!("%arg{i}")))
            .collect();
        FuncBuilder {
            graph,
            dialect,
            names,
            body: Vec::new(),
            next: 0,
        }
    }

    pub(crate) fn fresh(&mut self) -> String {
        let name = format!("%{}", self.next);
        self.next += 1;
        name
    }

    /// SSA name of an already lowered node.
    ///
    /// Fails when `id` has not been bound, which means a consumer was
    /// lowered before its operand.
    pub(crate) fn value(&self, id: NodeId) -> Result<String, CompileError> {
        match self.names.get(&id) {
            Some(name) => Ok(name.clone()),
            None => Err(CompileError::Lowering {
                op: format!(
                    "{} (operand %{} is not lowered)",
                    self.graph.node(id).op.name(),
                    id.0
                ),
                dialect: self.dialect.to_string(),
            }),
        }
    }

    pub(crate) fn type_of(&self, id: NodeId) -> String {
        let node = self.graph.node(id);
        mlir::tensor_type(&node.shape, node.dtype)
    }

    pub(crate) fn dtype_of(&self, id: NodeId) -> DType {
        self.graph.node(id).dtype
    }

    pub(crate) fn shape_of(&self, id: NodeId) -> &'g Shape {
        &self.graph.node(id).shape
    }

    /// Adds `stmt` with `operand` names already attached; returns the
    /// fresh result name.
    pub(crate) fn emit(&mut self, stmt: Stmt, result_type: String) -> String {
        let name = self.fresh();
        self.body.push(stmt.result(name.clone(), result_type));
        name
    }

    /// Emits an op over graph operands with the given result type.
    pub(crate) fn emit_op(
        &mut self,
        op: &str,
        operands: &[NodeId],
        result_type: String,
    ) -> Result<String, CompileError> {
        let mut stmt = Stmt::new(op);
        for &o in operands {
            stmt = stmt.operand(self.value(o)?, self.type_of(o));
        }
        Ok(self.emit(stmt, result_type))
    }

    pub(crate) fn bind(&mut self, id: NodeId, name: String) {
        self.names.insert(id, name);
    }

    pub(crate) fn finish(self) -> Result<mlir::Module, CompileError> {
        let graph = self.graph;
        let args = graph
            .parameters()
            .iter()
            .map(|&p| Ok((self.value(p)?, self.type_of(p))))
            .collect::<Result<_, CompileError>>()?;
        let result_types = graph.outputs().iter().map(|&o| self.type_of(o)).collect();
        let returns = graph
            .outputs()
            .iter()
            .map(|&o| self.value(o))
            .collect::<Result<_, _>>()?;
        Ok(mlir::Module {
            attrs: vec![(
                "torch.debug_module_name".to_string(),
                format!("\"{}\"", graph.name()),
            )],
            funcs: vec![Func {
                name: ENTRY_POINT.to_string(),
                args,
                result_types,
                body: self.body,
                returns,
            }],
        })
    }
}

pub(crate) fn unsupported(op: &Op, dialect: &str) -> CompileError {
    CompileError::Lowering {
        op: op.name().to_string(),
        dialect: dialect.to_string(),
    }
}

/// Elementwise primitives require operands of the result's exact shape.
pub(crate) fn check_same_shape(graph: &Graph, node: &Node, dialect: &str) -> Result<(), CompileError> {
    if node
        .operands
        .iter()
        .any(|&o| graph.node(o).shape != node.shape)
    {
        return Err(CompileError::Lowering {
            op: format!("{} with implicit broadcasting", node.op.name()),
            dialect: dialect.to_string(),
        });
    }
    Ok(())
}

/// Dims as i64 for attribute rendering.
pub(crate) fn dims_i64(shape: &Shape) -> Vec<i64> {
    shape.dims().iter().map(|&d| d as i64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::Tracer;
    use me_tensor::{Ops, Tensor};

    #[test]
    fn test_unbound_operand_is_a_lowering_error() {
        let mut t = Tracer::new("M");
        let x = t.parameter(&Tensor::zeros(Shape::new(vec![2])));
        let y = t.gelu(&x).unwrap();
        let graph = t.finish(&[y]);
        let out = graph.outputs()[0];

        let mut fb = FuncBuilder::new(&graph, "mhlo");
        assert_eq!(fb.value(graph.parameters()[0]).unwrap(), "%arg0");
        let err = fb.value(out).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Lowering { ref op, ref dialect } if op.starts_with("gelu") && dialect == "mhlo"
        ));
        assert!(fb.emit_op("chlo.erf", &[out], "tensor<2xf32>".into()).is_err());
        assert!(fb.finish().is_err());
    }
}
