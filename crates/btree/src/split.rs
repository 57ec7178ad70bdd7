//! Splitting oversized nodes and merging undersized ones.

use common::{DbError, DbResult};
use storage::{PAGE_SIZE, PageBuf};
use tracing::trace;

use crate::node::{HEADER, NodeBuilder, NodeRef, SCRATCH_SIZE, node_size};

/// Splits `old` into a left/right pair where the right half fits one page.
///
/// The left half may still exceed a page; `split3` splits it again.
pub(crate) fn split2(old: &NodeRef<'_>) -> DbResult<(NodeBuilder, NodeBuilder)> {
    let n = old.len();
    if n < 2 {
        return Err(DbError::Corruption(format!(
            "cannot split a node with {n} entries"
        )));
    }
    let total = old.encoded_size()?;
    let left_bytes = |nleft: usize| -> DbResult<usize> { Ok(node_size(nleft, old.offset(nleft)?)) };
    let right_bytes = |nleft: usize| -> DbResult<usize> { Ok(total - left_bytes(nleft)? + HEADER) };

    let mut nleft = n / 2;
    while nleft > 0 && left_bytes(nleft)? > PAGE_SIZE {
        nleft -= 1;
    }
    if nleft == 0 {
        return Err(DbError::Corruption(
            "split found no entry that fits on the left".into(),
        ));
    }
    while nleft < n && right_bytes(nleft)? > PAGE_SIZE {
        nleft += 1;
    }
    if nleft >= n {
        return Err(DbError::Corruption(
            "split left nothing for the right page".into(),
        ));
    }

    let nright = n - nleft;
    let mut left = NodeBuilder::scratch(old.node_type(), nleft)?;
    let mut right = NodeBuilder::page(old.node_type(), nright)?;
    left.append_range(old, 0, nleft)?;
    right.append_range(old, nleft, nright)?;
    Ok((left, right))
}

/// Splits a working node into one, two, or three page-size pieces.
pub(crate) fn split3(node: NodeBuilder) -> DbResult<Vec<PageBuf>> {
    if node.encoded_size() <= PAGE_SIZE {
        return Ok(vec![node.into_page()?]);
    }
    let (left, right) = split2(&node.view()?)?;
    if left.encoded_size() <= PAGE_SIZE {
        trace!(entries = node.len(), "btree.split.two_way");
        return Ok(vec![left.into_page()?, right.into_page()?]);
    }
    let (left_left, middle) = split2(&left.view()?)?;
    trace!(entries = node.len(), "btree.split.three_way");
    Ok(vec![
        left_left.into_page()?,
        middle.into_page()?,
        right.into_page()?,
    ])
}

/// Concatenates two siblings into a single node.
pub(crate) fn merge(left: &NodeRef<'_>, right: &NodeRef<'_>) -> DbResult<NodeBuilder> {
    let mut merged = NodeBuilder::with_capacity(
        left.node_type(),
        left.len() + right.len(),
        SCRATCH_SIZE,
    )?;
    merged.append_range(left, 0, left.len())?;
    merged.append_range(right, 0, right.len())?;
    Ok(merged)
}

/// Size of the node `merge` would produce.
pub(crate) fn merged_size(left: &NodeRef<'_>, right: &NodeRef<'_>) -> DbResult<usize> {
    Ok(left.encoded_size()? + right.encoded_size()? - HEADER)
}
