//! The compiled output of one function (or the top-level module body):
//! a flat byte array, a parallel per-byte line map for diagnostics, and
//! a constant pool. Every branch/loop operand is a 16-bit offset;
//! constant- and name-table indices are 8-bit, per the wire format this
//! spec fixes (§3/§4.3) — not widened, unlike the teacher's own
//! instruction set, which moved to 16-bit operands across the board.

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
  Constant,
  Nil,
  True,
  False,
  Pop,
  Dup,
  Swap,

  GetLocal,
  SetLocal,

  GetGlobal,
  DefineGlobal,
  SetGlobal,

  GetProperty,
  SetProperty,

  Add,
  Subtract,
  Multiply,
  Divide,
  FloorDivide,
  Power,
  Modulo,
  Negate,
  Not,

  Equal,
  Greater,
  Less,
  GreaterEqual,
  LessEqual,
  In,

  Jump,
  JumpIfFalse,
  JumpIfTrue,
  Loop,

  Call,
  CallDecorator,
  CallEnter,
  CallExit,
  Return,

  LoadModule,

  BuildList,
  BuildDict,
  BuildTuple,
  BuildSet,
  ListAppend,
  SetAdd,
  IndexGet,
  IndexSet,
  SliceGet,

  ForIterLocal,
  Ternary,

  Class,
  Inherit,
  Method,
  Super,

  Assert,
  Delete,
  Raise,
  TryBegin,
  TryEnd,
  JumpIfException,
}

impl OpCode {
  /// Number of operand bytes that follow this opcode in the code stream.
  pub fn operand_width(self) -> usize {
    use OpCode::*;
    match self {
      Constant | GetLocal | SetLocal | GetGlobal | DefineGlobal | SetGlobal | GetProperty
      | SetProperty | Call | CallDecorator | LoadModule | BuildList | BuildDict | BuildTuple
      | BuildSet | Class | Method | Delete => 1,
      Jump | JumpIfFalse | JumpIfTrue | Loop | TryBegin | JumpIfException => 2,
      ForIterLocal => 3,
      _ => 0,
    }
  }

  pub fn name(self) -> &'static str {
    use OpCode::*;
    match self {
      Constant => "CONSTANT",
      Nil => "NIL",
      True => "TRUE",
      False => "FALSE",
      Pop => "POP",
      Dup => "DUP",
      Swap => "SWAP",
      GetLocal => "GET_LOCAL",
      SetLocal => "SET_LOCAL",
      GetGlobal => "GET_GLOBAL",
      DefineGlobal => "DEFINE_GLOBAL",
      SetGlobal => "SET_GLOBAL",
      GetProperty => "GET_PROPERTY",
      SetProperty => "SET_PROPERTY",
      Add => "ADD",
      Subtract => "SUBTRACT",
      Multiply => "MULTIPLY",
      Divide => "DIVIDE",
      FloorDivide => "FLOOR_DIVIDE",
      Power => "POWER",
      Modulo => "MODULO",
      Negate => "NEGATE",
      Not => "NOT",
      Equal => "EQUAL",
      Greater => "GREATER",
      Less => "LESS",
      GreaterEqual => "GREATER_EQUAL",
      LessEqual => "LESS_EQUAL",
      In => "IN",
      Jump => "JUMP",
      JumpIfFalse => "JUMP_IF_FALSE",
      JumpIfTrue => "JUMP_IF_TRUE",
      Loop => "LOOP",
      Call => "CALL",
      CallDecorator => "CALL_DECORATOR",
      CallEnter => "CALL_ENTER",
      CallExit => "CALL_EXIT",
      Return => "RETURN",
      LoadModule => "LOAD_MODULE",
      BuildList => "BUILD_LIST",
      BuildDict => "BUILD_DICT",
      BuildTuple => "BUILD_TUPLE",
      BuildSet => "BUILD_SET",
      ListAppend => "LIST_APPEND",
      SetAdd => "SET_ADD",
      IndexGet => "INDEX_GET",
      IndexSet => "INDEX_SET",
      SliceGet => "SLICE_GET",
      ForIterLocal => "FOR_ITER_LOCAL",
      Ternary => "TERNARY",
      Class => "CLASS",
      Inherit => "INHERIT",
      Method => "METHOD",
      Super => "SUPER",
      Assert => "ASSERT",
      Delete => "DELETE",
      Raise => "RAISE",
      TryBegin => "TRY_BEGIN",
      TryEnd => "TRY_END",
      JumpIfException => "JUMP_IF_EXCEPTION",
    }
  }
}

impl TryFrom<u8> for OpCode {
  type Error = ();

  fn try_from(byte: u8) -> Result<Self, Self::Error> {
    const TABLE: &[OpCode] = &[
      OpCode::Constant,
      OpCode::Nil,
      OpCode::True,
      OpCode::False,
      OpCode::Pop,
      OpCode::Dup,
      OpCode::Swap,
      OpCode::GetLocal,
      OpCode::SetLocal,
      OpCode::GetGlobal,
      OpCode::DefineGlobal,
      OpCode::SetGlobal,
      OpCode::GetProperty,
      OpCode::SetProperty,
      OpCode::Add,
      OpCode::Subtract,
      OpCode::Multiply,
      OpCode::Divide,
      OpCode::FloorDivide,
      OpCode::Power,
      OpCode::Modulo,
      OpCode::Negate,
      OpCode::Not,
      OpCode::Equal,
      OpCode::Greater,
      OpCode::Less,
      OpCode::GreaterEqual,
      OpCode::LessEqual,
      OpCode::In,
      OpCode::Jump,
      OpCode::JumpIfFalse,
      OpCode::JumpIfTrue,
      OpCode::Loop,
      OpCode::Call,
      OpCode::CallDecorator,
      OpCode::CallEnter,
      OpCode::CallExit,
      OpCode::Return,
      OpCode::LoadModule,
      OpCode::BuildList,
      OpCode::BuildDict,
      OpCode::BuildTuple,
      OpCode::BuildSet,
      OpCode::ListAppend,
      OpCode::SetAdd,
      OpCode::IndexGet,
      OpCode::IndexSet,
      OpCode::SliceGet,
      OpCode::ForIterLocal,
      OpCode::Ternary,
      OpCode::Class,
      OpCode::Inherit,
      OpCode::Method,
      OpCode::Super,
      OpCode::Assert,
      OpCode::Delete,
      OpCode::Raise,
      OpCode::TryBegin,
      OpCode::TryEnd,
      OpCode::JumpIfException,
    ];
    TABLE.get(byte as usize).copied().ok_or(())
  }
}

/// A compiled, self-contained byte program: one per top-level module
/// body and one per `def`. Chunks are immutable once compilation of
/// their function finishes, and are shared (`Rc`) into the `Function`
/// value that owns them.
#[derive(Debug, Default)]
pub struct Chunk {
  pub name: String,
  pub code: Vec<u8>,
  pub lines: Vec<u32>,
  pub constants: Vec<Value>,
}

impl Chunk {
  pub fn new(name: impl Into<String>) -> Chunk {
    Chunk {
      name: name.into(),
      code: Vec::new(),
      lines: Vec::new(),
      constants: Vec::new(),
    }
  }

  pub fn write_u8(&mut self, byte: u8, line: u32) -> usize {
    self.code.push(byte);
    self.lines.push(line);
    self.code.len() - 1
  }

  pub fn write_op(&mut self, op: OpCode, line: u32) -> usize {
    self.write_u8(op as u8, line)
  }

  pub fn write_u16(&mut self, value: u16, line: u32) {
    let [hi, lo] = value.to_be_bytes();
    self.write_u8(hi, line);
    self.write_u8(lo, line);
  }

  pub fn read_u16(&self, offset: usize) -> u16 {
    u16::from_be_bytes([self.code[offset], self.code[offset + 1]])
  }

  pub fn patch_u16(&mut self, offset: usize, value: u16) {
    let [hi, lo] = value.to_be_bytes();
    self.code[offset] = hi;
    self.code[offset + 1] = lo;
  }

  /// Appends `value` to the constant pool, returning its index.
  /// The pool is capped at 256 entries per the spec's 8-bit constant
  /// index (§3).
  pub fn add_constant(&mut self, value: Value) -> crate::Result<u8> {
    if self.constants.len() >= u8::MAX as usize + 1 {
      return Err(crate::Error::compile(
        "too many constants in one chunk",
        span::Span::default(),
      ));
    }
    self.constants.push(value);
    Ok((self.constants.len() - 1) as u8)
  }

  pub fn line_at(&self, offset: usize) -> u32 {
    self.lines.get(offset).copied().unwrap_or(0)
  }

  /// Renders the whole chunk as `offset  line  MNEMONIC  operand(s)`
  /// lines, recursing into any `Function` constants. Used by the CLI's
  /// `--dump-bytecode` flag and by tests that assert on emitted shape.
  pub fn disassemble(&self) -> String {
    let mut out = String::new();
    out.push_str(&format!("== {} ==\n", self.name));
    let mut offset = 0;
    while offset < self.code.len() {
      offset = self.disassemble_instruction(&mut out, offset);
    }
    for constant in &self.constants {
      if let Value::Function(func) = constant {
        out.push('\n');
        out.push_str(&func.chunk.disassemble());
      }
    }
    out
  }

  pub fn disassemble_instruction(&self, out: &mut String, offset: usize) -> usize {
    let line = self.line_at(offset);
    let op = OpCode::try_from(self.code[offset]).expect("invalid opcode in chunk");
    let width = op.operand_width();
    match width {
      0 => out.push_str(&format!("{offset:04} {line:4} {}\n", op.name())),
      1 => out.push_str(&format!(
        "{offset:04} {line:4} {:<16} {}\n",
        op.name(),
        self.code[offset + 1]
      )),
      2 => {
        let operand = self.read_u16(offset + 1);
        out.push_str(&format!("{offset:04} {line:4} {:<16} {}\n", op.name(), operand));
      }
      3 => out.push_str(&format!(
        "{offset:04} {line:4} {:<16} {} {} {}\n",
        op.name(),
        self.code[offset + 1],
        self.code[offset + 2],
        self.code[offset + 3],
      )),
      _ => unreachable!("no opcode has more than 3 operand bytes"),
    }
    offset + 1 + width
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn opcode_roundtrips_through_u8() {
    for byte in 0..=OpCode::JumpIfException as u8 {
      let op = OpCode::try_from(byte).unwrap();
      assert_eq!(op as u8, byte);
    }
  }

  #[test]
  fn disassemble_simple_chunk() {
    let mut chunk = Chunk::new("test");
    let idx = chunk.add_constant(Value::Int(1)).unwrap();
    chunk.write_op(OpCode::Constant, 1);
    chunk.write_u8(idx, 1);
    chunk.write_op(OpCode::Return, 1);

    let text = chunk.disassemble();
    assert!(text.contains("CONSTANT"));
    assert!(text.contains("RETURN"));
  }

  #[test]
  fn jump_operand_roundtrips() {
    let mut chunk = Chunk::new("test");
    let at = chunk.write_op(OpCode::JumpIfFalse, 1);
    chunk.write_u16(0xBEEF, 1);
    chunk.patch_u16(at + 1, 0x1234);
    assert_eq!(chunk.read_u16(at + 1), 0x1234);
  }
}
