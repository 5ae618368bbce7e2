//! Query-packet wire format (spec.md §6): a packet is a concatenation of
//! operand groups. Each group is one `flags` byte, a `Fetch` that names the
//! partition and sort key, and zero or more operators applied to it in
//! order.
//!
//! The byte stream carries no independent length prefix per operand — the
//! parser locates the next operand's `flags` byte only by fully consuming
//! the current one, which in turn requires resolving `Fetch`'s schema code
//! to learn the sort key's byte length. An unresolvable schema code
//! therefore aborts not just that operand but the rest of the packet: there
//! is no way to resynchronize the stream without knowing how many bytes the
//! unresolvable `Fetch` actually spanned. This is a deliberate, recorded
//! divergence from a narrower reading of the error table — see DESIGN.md's
//! "Open Question decisions" §4 for why per-operand recovery isn't possible
//! without changing the wire format itself.

use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian};

#[derive(Debug, Clone)]
pub enum Operator {
    Reset,
    Remove,
    Write { field_id: u8, bytes: Vec<u8> },
    WProc { field_id: u8, opcode: u8, bytes: Vec<u8> },
    Read { field_id: u8 },
}

#[derive(Debug, Clone)]
pub struct Operand {
    pub flags: u8,
    pub schema_id: u32,
    pub h: u64,
    pub sort_key: Vec<u8>,
    pub operators: Vec<Operator>,
}

/// Parses every operand in `packet`. Stops at the first operand whose
/// schema code doesn't resolve via `resolve_sort_key_len`, returning
/// whatever operands parsed cleanly before it. Whole-packet abort, not just
/// that operand, is deliberate — see the module doc.
pub fn parse_packet(packet: &[u8], resolve_sort_key_len: impl Fn(u32, &[u8]) -> Option<usize>) -> Vec<Operand> {
    let mut operands = Vec::new();
    let mut pos = 0;
    while pos < packet.len() {
        match parse_operand(packet, pos, &resolve_sort_key_len) {
            Ok((operand, next)) => {
                operands.push(operand);
                pos = next;
            }
            Err(_) => break,
        }
    }
    operands
}

fn parse_operand(bytes: &[u8], mut pos: usize, resolve_sort_key_len: &impl Fn(u32, &[u8]) -> Option<usize>) -> Result<(Operand, usize)> {
    if pos + 1 + 1 + 8 + 4 > bytes.len() {
        bail!("truncated operand header");
    }
    let flags = bytes[pos];
    pos += 1;
    if bytes[pos] != b'f' {
        bail!("expected Fetch ('f') at operand start, found {:#x}", bytes[pos]);
    }
    pos += 1;
    let h = LittleEndian::read_u64(&bytes[pos..pos + 8]);
    pos += 8;
    let schema_id = LittleEndian::read_u32(&bytes[pos..pos + 4]);
    pos += 4;

    let sort_key_len = resolve_sort_key_len(schema_id, &bytes[pos..]).ok_or_else(|| anyhow::anyhow!("unknown schema code {schema_id}"))?;
    if pos + sort_key_len > bytes.len() {
        bail!("truncated sort key");
    }
    let sort_key = bytes[pos..pos + sort_key_len].to_vec();
    pos += sort_key_len;

    let mut operators = Vec::new();
    while pos < bytes.len() {
        match bytes[pos] {
            b'R' => {
                operators.push(Operator::Reset);
                pos += 1;
            }
            b'P' => {
                operators.push(Operator::Remove);
                pos += 1;
            }
            b'w' => {
                if pos + 1 + 1 + 4 > bytes.len() {
                    bail!("truncated Write operator");
                }
                let field_id = bytes[pos + 1];
                let len = LittleEndian::read_u32(&bytes[pos + 2..pos + 6]) as usize;
                let start = pos + 6;
                if start + len > bytes.len() {
                    bail!("truncated Write payload");
                }
                operators.push(Operator::Write { field_id, bytes: bytes[start..start + len].to_vec() });
                pos = start + len;
            }
            b'+' => {
                if pos + 1 + 1 + 1 + 4 > bytes.len() {
                    bail!("truncated WProc operator");
                }
                let field_id = bytes[pos + 1];
                let opcode = bytes[pos + 2];
                let len = LittleEndian::read_u32(&bytes[pos + 3..pos + 7]) as usize;
                let start = pos + 7;
                if start + len > bytes.len() {
                    bail!("truncated WProc payload");
                }
                operators.push(Operator::WProc { field_id, opcode, bytes: bytes[start..start + len].to_vec() });
                pos = start + len;
            }
            b'r' => {
                if pos + 2 > bytes.len() {
                    bail!("truncated Read operator");
                }
                operators.push(Operator::Read { field_id: bytes[pos + 1] });
                pos += 2;
            }
            _ => break,
        }
    }

    Ok((Operand { flags, schema_id, h, sort_key, operators }, pos))
}
