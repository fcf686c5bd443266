use crate::error::Result;
use crate::ir::{Expr, IrMethod, JType, LocalId, Stmt};
use crate::passes::{Pass, entry_labels, literal_value, region_end, retain_indexed};

/// Folds the element stores that follow a fixed-size allocation into one array literal.
pub(crate) struct FillArray;

impl Pass for FillArray {
    fn name(&self) -> &'static str {
        "fill-array"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let mut changed = false;
        while let Some(literal) = find_literal(method) {
            let mut keep = vec![true; method.stmts.len()];
            keep[literal.allocation] = false;
            for store in &literal.stores {
                keep[*store] = false;
            }
            method.stmts[literal.last] = Stmt::assign(
                literal.local,
                Expr::FilledArray {
                    elem: literal.elem,
                    values: literal.values,
                },
            );
            retain_indexed(method, &keep);
            changed = true;
        }
        Ok(changed)
    }
}

struct Literal {
    local: LocalId,
    elem: JType,
    allocation: usize,
    /// Stores folded away, the last one excluded.
    stores: Vec<usize>,
    last: usize,
    values: Vec<Expr>,
}

fn find_literal(method: &IrMethod) -> Option<Literal> {
    let entries = entry_labels(method);
    let in_phi = method.phi_operands();
    for (index, stmt) in method.stmts.iter().enumerate() {
        let Stmt::Assign {
            local,
            value: Expr::NewArray { elem, size },
        } = stmt
        else {
            continue;
        };
        let Some(length) = size.as_const().and_then(|size| size.as_int()) else {
            continue;
        };
        if length < 1 || in_phi.contains(local) {
            continue;
        }
        let end = region_end(method, index, &entries);
        if let Some(literal) = match_stores(method, *local, elem, length as usize, index, end) {
            return Some(literal);
        }
    }
    None
}

/// Matches in-order stores of every element of `local` in `index + 1..end`.
fn match_stores(
    method: &IrMethod,
    local: LocalId,
    elem: &JType,
    length: usize,
    index: usize,
    end: usize,
) -> Option<Literal> {
    let mut values = Vec::with_capacity(length);
    let mut stores = Vec::with_capacity(length);
    for position in index + 1..end {
        let stmt = &method.stmts[position];
        match stmt {
            Stmt::Label(_) => continue,
            Stmt::ArraySet {
                array: Expr::Local(array),
                index: element,
                value,
                ..
            } if *array == local => {
                let expected = values.len() as i32;
                let at = literal_value(method, element).and_then(|index| index.as_int());
                if at != Some(expected) || mentions(value, local) {
                    return None;
                }
                let last = values.len() + 1 == length;
                // Earlier values are evaluated later once folded.
                if !last && !value.is_pure() {
                    return None;
                }
                values.push(value.clone());
                stores.push(position);
            }
            Stmt::FillArrayData {
                array: Expr::Local(array),
                data,
                ..
            } if *array == local => {
                if !values.is_empty() || data.len() != length {
                    return None;
                }
                values = data.iter().cloned().map(Expr::Const).collect();
                stores.push(position);
            }
            _ => {
                if stmt.uses().contains(&local) {
                    return None;
                }
                continue;
            }
        }
        if values.len() == length {
            let last = stores.pop()?;
            return Some(Literal {
                local,
                elem: elem.clone(),
                allocation: index,
                stores,
                last,
                values,
            });
        }
    }
    None
}

fn mentions(expr: &Expr, local: LocalId) -> bool {
    let mut found = false;
    expr.for_each_local(&mut |id| found |= id == local);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, LabelId, TypeHint};
    use crate::passes::fixtures::void_method;

    fn int_array(ir: &mut IrMethod, length: i32) -> (LocalId, Stmt) {
        let array = ir.new_local(TypeHint::Exact(JType::array_of(JType::Int)));
        let allocation = Stmt::assign(
            array,
            Expr::NewArray {
                elem: JType::Int,
                size: Box::new(Expr::int(length)),
            },
        );
        (array, allocation)
    }

    fn store(array: LocalId, index: i32, value: i32) -> Stmt {
        Stmt::ArraySet {
            array: Expr::Local(array),
            index: Expr::int(index),
            value: Expr::int(value),
            elem: TypeHint::Exact(JType::Int),
        }
    }

    #[test]
    fn element_stores_become_one_literal() {
        let mut ir = void_method();
        let (array, allocation) = int_array(&mut ir, 3);
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            allocation,
            store(array, 0, 7),
            store(array, 1, 8),
            store(array, 2, 9),
            Stmt::Throw(Expr::Local(array)),
        ];
        assert!(FillArray.run(&mut ir).expect("run"));
        assert_eq!(
            ir.stmts,
            vec![
                Stmt::Label(LabelId(0)),
                Stmt::assign(
                    array,
                    Expr::FilledArray {
                        elem: JType::Int,
                        values: vec![Expr::int(7), Expr::int(8), Expr::int(9)],
                    }
                ),
                Stmt::Throw(Expr::Local(array)),
            ]
        );
        assert!(!FillArray.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn array_data_of_matching_length_is_folded() {
        let mut ir = void_method();
        let (array, allocation) = int_array(&mut ir, 2);
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            allocation,
            Stmt::FillArrayData {
                array: Expr::Local(array),
                data: vec![Constant::Narrow(1), Constant::Narrow(2)],
                elem: TypeHint::Unknown,
            },
            Stmt::Throw(Expr::Local(array)),
        ];
        assert!(FillArray.run(&mut ir).expect("run"));
        assert!(matches!(
            &ir.stmts[1],
            Stmt::Assign { value: Expr::FilledArray { values, .. }, .. } if values.len() == 2
        ));
    }

    #[test]
    fn out_of_order_or_partial_stores_are_left_alone() {
        let mut ir = void_method();
        let (array, allocation) = int_array(&mut ir, 2);
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            allocation,
            store(array, 1, 8),
            store(array, 0, 7),
            Stmt::Throw(Expr::Local(array)),
        ];
        assert!(!FillArray.run(&mut ir).expect("run"));

        let mut ir = void_method();
        let (array, allocation) = int_array(&mut ir, 3);
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            allocation,
            store(array, 0, 7),
            Stmt::Throw(Expr::Local(array)),
        ];
        assert!(!FillArray.run(&mut ir).expect("run"));
    }
}
