use me_tensor::Shape;

use super::{check_same_shape, dims_i64, unsupported, FuncBuilder};
use crate::error::Result;
use crate::graph::{Graph, Node, Op, ReduceKind};
use crate::mlir::{self, Region, Stmt};

const DIALECT: &str = "mhlo";

/// Lower a decomposed graph to an MHLO module.
pub fn lower(graph: &Graph) -> Result<mlir::Module> {
    let mut fb = FuncBuilder::new(graph, DIALECT);
    for node in graph.nodes() {
        if let Op::Parameter { .. } = node.op {
            continue;
        }
        let name = lower_node(&mut fb, graph, node)?;
        fb.bind(node.id, name);
    }
    fb.finish()
}

fn lower_node(fb: &mut FuncBuilder<'_>, graph: &Graph, node: &Node) -> Result<String> {
    let ty = mlir::tensor_type(&node.shape, node.dtype);
    let ops = &node.operands;
    let name = match &node.op {
        Op::Constant(t) => fb.emit(
            Stmt::new("mhlo.constant").attr("value", mlir::dense_tensor(t)),
            ty,
        ),
        Op::Splat(v) => fb.emit(
            Stmt::new("mhlo.constant").attr("value", mlir::dense_splat(*v, &node.shape)),
            ty,
        ),
        Op::Add | Op::Mul | Op::Sub | Op::Div => {
            check_same_shape(graph, node, DIALECT)?;
            let op = match node.op {
                Op::Add => "mhlo.add",
                Op::Mul => "mhlo.multiply",
                Op::Sub => "mhlo.subtract",
                _ => "mhlo.divide",
            };
            fb.emit_op(op, ops, ty)?
        }
        Op::Exp => fb.emit_op("mhlo.exponential", ops, ty)?,
        Op::Rsqrt => fb.emit_op("mhlo.rsqrt", ops, ty)?,
        Op::Erf => fb.emit_op("chlo.erf", ops, ty)?,
        Op::Reshape => fb.emit_op("mhlo.reshape", ops, ty)?,
        Op::Broadcast { dims } => {
            let dims: Vec<i64> = dims.iter().map(|&d| d as i64).collect();
            let stmt = Stmt::new("mhlo.broadcast_in_dim")
                .operand(fb.value(ops[0])?, fb.type_of(ops[0]))
                .attr("broadcast_dimensions", mlir::dense_i64(&dims));
            fb.emit(stmt, ty)
        }
        Op::Transpose { perm } => {
            let perm: Vec<i64> = perm.iter().map(|&d| d as i64).collect();
            let stmt = Stmt::new("mhlo.transpose")
                .operand(fb.value(ops[0])?, fb.type_of(ops[0]))
                .attr("permutation", mlir::dense_i64(&perm));
            fb.emit(stmt, ty)
        }
        Op::SliceRows { len } => {
            let input = fb.shape_of(ops[0]);
            let mut limit = dims_i64(input);
            limit[0] = *len as i64;
            let zeros = vec![0; input.ndim()];
            let ones = vec![1; input.ndim()];
            let stmt = Stmt::new("mhlo.slice")
                .operand(fb.value(ops[0])?, fb.type_of(ops[0]))
                .attr("start_indices", mlir::dense_i64(&zeros))
                .attr("limit_indices", mlir::dense_i64(&limit))
                .attr("strides", mlir::dense_i64(&ones));
            fb.emit(stmt, ty)
        }
        Op::Embedding => {
            // Each id selects a [1, dim] slice of the table; the id dims
            // become the leading result dims.
            let table = fb.shape_of(ops[0]);
            let ids_rank = fb.shape_of(ops[1]).ndim();
            let numbers = format!(
                "#mhlo.gather<offset_dims = [{r}], collapsed_slice_dims = [0], \
                 start_index_map = [0], index_vector_dim = {r}>",
                r = ids_rank
            );
            let stmt = Stmt::new("mhlo.gather")
                .operand(fb.value(ops[0])?, fb.type_of(ops[0]))
                .operand(fb.value(ops[1])?, fb.type_of(ops[1]))
                .attr("dimension_numbers", numbers)
                .attr("indices_are_sorted", "false")
                .attr("slice_sizes", mlir::dense_i64(&[1, table.dim(1) as i64]));
            fb.emit(stmt, ty)
        }
        Op::Dot => {
            let rank = node.shape.ndim();
            let batch: Vec<String> = (0..rank - 2).map(|d| d.to_string()).collect();
            let mut fields = Vec::new();
            if !batch.is_empty() {
                let batch = batch.join(", ");
                fields.push(format!("lhs_batching_dimensions = [{batch}]"));
                fields.push(format!("rhs_batching_dimensions = [{batch}]"));
            }
            fields.push(format!("lhs_contracting_dimensions = [{}]", rank - 1));
            fields.push(format!("rhs_contracting_dimensions = [{}]", rank - 2));
            let stmt = Stmt::new("mhlo.dot_general")
                .operand(fb.value(ops[0])?, fb.type_of(ops[0]))
                .operand(fb.value(ops[1])?, fb.type_of(ops[1]))
                .attr(
                    "dot_dimension_numbers",
                    format!("#mhlo.dot<{}>", fields.join(", ")),
                );
            fb.emit(stmt, ty)
        }
        Op::Reduce { kind, axis } => lower_reduce(fb, node, *kind, *axis, ty)?,
        other => return Err(unsupported(other, DIALECT)),
    };
    Ok(name)
}

fn lower_reduce(
    fb: &mut FuncBuilder<'_>,
    node: &Node,
    kind: ReduceKind,
    axis: usize,
    ty: String,
) -> Result<String> {
    let scalar = mlir::tensor_type(&Shape::new(vec![]), node.dtype);
    let (init, combine) = match kind {
        ReduceKind::Sum => (0.0, "mhlo.add"),
        ReduceKind::Max => (f32::NEG_INFINITY, "mhlo.maximum"),
    };
    let init_value = format!("dense<{}> : {}", mlir::float_literal(init), scalar);
    let init = fb.emit(
        Stmt::new("mhlo.constant").attr("value", init_value),
        scalar.clone(),
    );

    let (lhs, rhs, acc) = (fb.fresh(), fb.fresh(), fb.fresh());
    let body = vec![
        Stmt::new(combine)
            .operand(lhs.clone(), scalar.clone())
            .operand(rhs.clone(), scalar.clone())
            .result(acc.clone(), scalar.clone()),
        Stmt::new("mhlo.return").operand(acc, scalar.clone()),
    ];
    let region = Region {
        args: vec![(lhs, scalar.clone()), (rhs, scalar.clone())],
        body,
    };
    let input = node.operands[0];
    let input_name = fb.value(input)?;
    let stmt = Stmt::new("mhlo.reduce")
        .operand(input_name, fb.type_of(input))
        .operand(init, scalar)
        .region(region)
        .attr("dimensions", mlir::dense_i64(&[axis as i64]));
    Ok(fb.emit(stmt, ty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::decompose;
    use crate::error::CompileError;
    use crate::tracer::Tracer;
    use me_tensor::{Ops, Tensor};

    fn lower_traced(f: impl FnOnce(&mut Tracer, &crate::tracer::Traced) -> crate::tracer::Traced) -> String {
        let mut t = Tracer::new("M");
        let x = t.parameter(&Tensor::zeros(Shape::new(vec![2, 4])));
        let y = f(&mut t, &x);
        lower(&decompose(&t.finish(&[y]))).unwrap().to_string()
    }

    #[test]
    fn test_softmax_module() {
        let text = lower_traced(|t, x| t.softmax(x).unwrap());
        assert!(text.starts_with("module attributes {torch.debug_module_name = \"M\"} {\n"));
        assert!(text.contains("func.func @forward(%arg0: tensor<2x4xf32>) -> tensor<2x4xf32> {"));
        assert!(text.contains("\"mhlo.constant\"() {value = dense<0xFF800000> : tensor<f32>} : () -> tensor<f32>"));
        assert!(text.contains("\"mhlo.maximum\""));
        assert!(text.contains(
            "{dimensions = dense<[1]> : tensor<1xi64>} : (tensor<2x4xf32>, tensor<f32>) -> tensor<2xf32>"
        ));
        assert!(text.contains(
            "\"mhlo.broadcast_in_dim\"(%"
        ));
        assert!(text.contains("{broadcast_dimensions = dense<[0]> : tensor<1xi64>} : (tensor<2xf32>) -> tensor<2x4xf32>"));
        assert!(text.contains("\"mhlo.exponential\""));
        assert!(text.contains("\"mhlo.divide\""));
        assert!(text.trim_end().ends_with("}\n}"));
    }

    #[test]
    fn test_linear_uses_dot_general() {
        let text = lower_traced(|t, x| {
            let w = t.constant(&Tensor::ones(Shape::new(vec![3, 4]))).unwrap();
            let b = t.constant(&Tensor::zeros(Shape::new(vec![3]))).unwrap();
            t.linear(x, &w, &b).unwrap()
        });
        assert!(text.contains("\"mhlo.transpose\"(%0) {permutation = dense<[1, 0]> : tensor<2xi64>} : (tensor<3x4xf32>) -> tensor<4x3xf32>"));
        assert!(text.contains("#mhlo.dot<lhs_contracting_dimensions = [1], rhs_contracting_dimensions = [0]>"));
        assert!(text.contains("-> tensor<2x3xf32>"));
    }

    #[test]
    fn test_batched_dot_and_gather() {
        let mut t = Tracer::new("M");
        let ids = t.parameter(&Tensor::from_i64(vec![0; 6], Shape::new(vec![2, 3])).unwrap());
        let table = t.constant(&Tensor::ones(Shape::new(vec![10, 4]))).unwrap();
        let e = t.embedding(&table, &ids).unwrap();
        let e4 = t.reshape(&e, &[2, 3, 2, 2]).unwrap();
        let y = t.matmul(&e4, &e4).unwrap();
        let text = lower(&decompose(&t.finish(&[y]))).unwrap().to_string();

        assert!(text.contains("func.func @forward(%arg0: tensor<2x3xi64>)"));
        assert!(text.contains("#mhlo.gather<offset_dims = [2], collapsed_slice_dims = [0], start_index_map = [0], index_vector_dim = 2>"));
        assert!(text.contains("slice_sizes = dense<[1, 4]> : tensor<2xi64>"));
        assert!(text.contains("(tensor<10x4xf32>, tensor<2x3xi64>) -> tensor<2x3x4xf32>"));
        assert!(text.contains("#mhlo.dot<lhs_batching_dimensions = [0, 1], rhs_batching_dimensions = [0, 1], lhs_contracting_dimensions = [3], rhs_contracting_dimensions = [2]>"));
    }

    #[test]
    fn test_composites_are_rejected() {
        let mut t = Tracer::new("M");
        let x = t.parameter(&Tensor::zeros(Shape::new(vec![2])));
        let y = t.gelu(&x).unwrap();
        let err = lower(&t.finish(&[y])).unwrap_err();
        assert!(matches!(err, CompileError::Lowering { ref op, ref dialect } if op == "gelu" && dialect == "mhlo"));
    }
}
