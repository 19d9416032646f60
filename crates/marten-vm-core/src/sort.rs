//! Sorting with a script comparator

use std::cmp::Ordering;

use crate::host::HostCallContext;
use crate::value::Value;

/// Sort `values` in place the way `Array.prototype.sort` does.
///
/// Without a comparator elements are compared as strings with `undefined`
/// last. A script comparator whose code block is flagged as a plain numeric
/// comparison is never called; the values are sorted numerically instead.
/// Any other comparator is called through `ctx` and may throw.
pub fn sort_with_comparator(
    ctx: &mut HostCallContext<'_>,
    values: &mut Vec<Value>,
    comparator: &Value,
) -> Result<(), Value> {
    let (mut defined, undefined): (Vec<Value>, Vec<Value>) =
        values.drain(..).partition(|value| !value.is_undefined());

    if comparator.is_undefined() {
        defined.sort_by_cached_key(|value| value.to_js_string().encode_utf16().collect::<Vec<_>>());
    } else if is_numeric_comparator(ctx, comparator) {
        tracing::trace!(len = defined.len(), "numeric comparator shortcut");
        defined.sort_by(|a, b| a.to_number().total_cmp(&b.to_number()));
    } else {
        defined = merge_sort(defined, &mut |a, b| {
            let result = ctx.call(comparator, Value::Undefined, &[a.clone(), b.clone()])?;
            let n = result.to_number();
            Ok(if n > 0.0 { Ordering::Greater } else { Ordering::Less })
        })?;
    }

    values.extend(defined);
    values.extend(undefined);
    Ok(())
}

fn is_numeric_comparator(ctx: &mut HostCallContext<'_>, comparator: &Value) -> bool {
    let Some(function) = comparator.as_object().and_then(|object| object.as_function()) else {
        return false;
    };
    let opcodes = ctx.vm().opcodes();
    function.template.code_block(&opcodes).is_numeric_compare_function()
}

/// Stable merge sort over a fallible comparison; `Greater` means `a` goes
/// after `b`.
fn merge_sort<F>(mut values: Vec<Value>, compare: &mut F) -> Result<Vec<Value>, Value>
where
    F: FnMut(&Value, &Value) -> Result<Ordering, Value>,
{
    if values.len() <= 1 {
        return Ok(values);
    }
    let right = values.split_off(values.len() / 2);
    let left = merge_sort(values, compare)?;
    let right = merge_sort(right, compare)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        if compare(a, b)? == Ordering::Greater {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sort_is_stable() {
        let values: Vec<Value> = [(3, "a"), (1, "b"), (3, "c"), (2, "d")]
            .iter()
            .map(|&(_, s)| Value::string(s))
            .collect();
        let keys = |v: &Value| match v.as_str() {
            Some("a") | Some("c") => 3,
            Some("b") => 1,
            _ => 2,
        };
        let sorted = merge_sort(values, &mut |a, b| Ok(keys(a).cmp(&keys(b)))).unwrap();
        let order: Vec<_> = sorted.iter().map(|v| v.as_str().unwrap().to_string()).collect();
        assert_eq!(order, ["b", "d", "a", "c"]);
    }

    #[test]
    fn test_merge_sort_propagates_errors() {
        let values = vec![Value::Int32(2), Value::Int32(1)];
        let result = merge_sort(values, &mut |_, _| Err(Value::string("boom")));
        assert_eq!(result.unwrap_err().as_str(), Some("boom"));
    }
}
