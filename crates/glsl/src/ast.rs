//! Typed AST produced by the parser.
//!
//! Nodes live in flat arenas indexed by small ids and are released wholesale
//! when the compilation drops the `Ast`. Every expression carries its
//! resolved type and, where known, a folded constant value.

use crate::pp::Location;
use shale_core::ir::Interpolation;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BasicType {
    Void,
    Float,
    Int,
    UInt,
    Bool,
    Sampler2D,
    SamplerCube,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    Undefined,
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Qualifier {
    /// Function-local value.
    Temporary,
    /// File-scope plain global.
    Global,
    ConstExpr,
    Attribute,
    VaryingIn,
    VaryingOut,
    Uniform,
    In,
    Out,
    InOut,
    FragColor,
    FragData,
    FragDepth,
    Position,
    PointSize,
    FragCoord,
    FrontFacing,
}

impl Qualifier {
    pub fn is_input(self) -> bool {
        matches!(
            self,
            Qualifier::Attribute
                | Qualifier::VaryingIn
                | Qualifier::FragCoord
                | Qualifier::FrontFacing
        )
    }

    pub fn is_assignable(self) -> bool {
        !matches!(
            self,
            Qualifier::ConstExpr
                | Qualifier::Attribute
                | Qualifier::VaryingIn
                | Qualifier::Uniform
                | Qualifier::FragCoord
                | Qualifier::FrontFacing
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Type {
    pub basic: BasicType,
    pub precision: Precision,
    /// Vector size, or matrix column count.
    pub size: u8,
    /// Matrix rows; 1 for scalars and vectors.
    pub rows: u8,
    pub array: Option<u32>,
    pub qualifier: Qualifier,
    pub invariant: bool,
    pub interpolation: Interpolation,
}

impl Type {
    pub fn new(basic: BasicType) -> Type {
        Type {
            basic,
            precision: Precision::Undefined,
            size: 1,
            rows: 1,
            array: None,
            qualifier: Qualifier::Temporary,
            invariant: false,
            interpolation: Interpolation::Smooth,
        }
    }

    pub fn float() -> Type {
        Type::new(BasicType::Float)
    }

    pub fn int() -> Type {
        Type::new(BasicType::Int)
    }

    pub fn bool_() -> Type {
        Type::new(BasicType::Bool)
    }

    pub fn void() -> Type {
        Type::new(BasicType::Void)
    }

    pub fn vec(n: u8) -> Type {
        let mut t = Type::float();
        t.size = n;
        t
    }

    pub fn ivec(n: u8) -> Type {
        let mut t = Type::int();
        t.size = n;
        t
    }

    pub fn bvec(n: u8) -> Type {
        let mut t = Type::bool_();
        t.size = n;
        t
    }

    pub fn mat(n: u8) -> Type {
        let mut t = Type::float();
        t.size = n;
        t.rows = n;
        t
    }

    pub fn is_scalar(&self) -> bool {
        self.size == 1 && self.rows == 1 && self.array.is_none()
    }

    pub fn is_vector(&self) -> bool {
        self.size > 1 && self.rows == 1
    }

    pub fn is_matrix(&self) -> bool {
        self.rows > 1
    }

    pub fn is_sampler(&self) -> bool {
        matches!(self.basic, BasicType::Sampler2D | BasicType::SamplerCube)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.basic, BasicType::Float | BasicType::Int | BasicType::UInt)
    }

    pub fn is_array(&self) -> bool {
        self.array.is_some()
    }

    /// Scalar components of one element (rows × columns).
    pub fn components(&self) -> u32 {
        self.size as u32 * self.rows as u32
    }

    /// IR registers one element occupies (one per column).
    pub fn registers(&self) -> u32 {
        if self.is_matrix() {
            self.size as u32
        } else {
            1
        }
    }

    /// Registers including the array dimension.
    pub fn total_registers(&self) -> u32 {
        self.registers() * self.array.unwrap_or(1)
    }

    /// Shape equality: basic type, size, and array length; qualifiers and
    /// precision do not participate.
    pub fn same_shape(&self, other: &Type) -> bool {
        self.basic == other.basic
            && self.size == other.size
            && self.rows == other.rows
            && self.array == other.array
    }

    pub fn element(&self) -> Type {
        let mut t = *self;
        t.array = None;
        t
    }

    /// One column of a matrix, or one component of a vector.
    pub fn indexed_once(&self) -> Type {
        let mut t = self.element();
        if self.array.is_some() {
            return t;
        }
        if self.is_matrix() {
            t.rows = 1;
            t.size = self.rows;
        } else {
            t.size = 1;
        }
        t
    }

    pub fn display_name(&self) -> String {
        let base = match self.basic {
            BasicType::Void => "void",
            BasicType::Float => {
                if self.is_matrix() {
                    return format!("mat{}", self.size);
                } else if self.is_vector() {
                    return format!("vec{}", self.size);
                } else {
                    "float"
                }
            }
            BasicType::Int => {
                if self.is_vector() {
                    return format!("ivec{}", self.size);
                } else {
                    "int"
                }
            }
            BasicType::UInt => {
                if self.is_vector() {
                    return format!("uvec{}", self.size);
                } else {
                    "uint"
                }
            }
            BasicType::Bool => {
                if self.is_vector() {
                    return format!("bvec{}", self.size);
                } else {
                    "bool"
                }
            }
            BasicType::Sampler2D => "sampler2D",
            BasicType::SamplerCube => "samplerCube",
        };
        base.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    F(f32),
    I(i32),
    U(u32),
    B(bool),
}

impl Scalar {
    pub fn as_f32(self) -> f32 {
        match self {
            Scalar::F(v) => v,
            Scalar::I(v) => v as f32,
            Scalar::U(v) => v as f32,
            Scalar::B(v) => v as i32 as f32,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Scalar::F(v) => v as i32,
            Scalar::I(v) => v,
            Scalar::U(v) => v as i32,
            Scalar::B(v) => v as i32,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Scalar::F(v) => v != 0.0,
            Scalar::I(v) => v != 0,
            Scalar::U(v) => v != 0,
            Scalar::B(v) => v,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Scalar::F(v) => v.to_bits(),
            Scalar::I(v) => v as u32,
            Scalar::U(v) => v,
            Scalar::B(v) => {
                if v {
                    !0
                } else {
                    0
                }
            }
        }
    }
}

pub type ConstVal = Vec<Scalar>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    LogicalNot,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinFn {
    Radians,
    Degrees,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Pow,
    Exp,
    Log,
    Exp2,
    Log2,
    Sqrt,
    InverseSqrt,
    Abs,
    Sign,
    Floor,
    Ceil,
    Fract,
    Mod,
    Min,
    Max,
    Clamp,
    Mix,
    Step,
    SmoothStep,
    Length,
    Distance,
    Dot,
    Cross,
    Normalize,
    Reflect,
    Texture2D,
    Texture,
    TextureLod,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExprId(pub u32);

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct StmtId(pub u32);

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

#[derive(Clone, Debug)]
pub enum ExprKind {
    Symbol(SymbolId),
    Literal(ConstVal),
    Unary(UnaryOp, ExprId),
    Binary(BinaryOp, ExprId, ExprId),
    Assign(Option<BinaryOp>, ExprId, ExprId),
    Ternary(ExprId, ExprId, ExprId),
    Comma(ExprId, ExprId),
    Index(ExprId, ExprId),
    Swizzle(ExprId, [u8; 4], u8),
    Call(usize, Vec<ExprId>),
    Builtin(BuiltinFn, Vec<ExprId>),
    Constructor(Type, Vec<ExprId>),
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub loc: Location,
    pub constant: Option<ConstVal>,
}

/// Restricted-loop facts recovered by the limitation validator.
#[derive(Clone, Copy, Debug)]
pub struct LoopMeta {
    pub index: SymbolId,
    pub iterations: u32,
    pub init: Scalar,
    pub step: Scalar,
    pub unroll: bool,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Empty,
    Expr(ExprId),
    Decl(Vec<(SymbolId, Option<ExprId>)>),
    Block(Vec<StmtId>),
    If(ExprId, StmtId, Option<StmtId>),
    For {
        init: Option<StmtId>,
        cond: Option<ExprId>,
        step: Option<ExprId>,
        body: StmtId,
    },
    While(ExprId, StmtId),
    DoWhile(StmtId, ExprId),
    Return(Option<ExprId>),
    Break,
    Continue,
    Discard,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Location,
    pub loop_meta: Option<LoopMeta>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinVar {
    Position,
    PointSize,
    FragCoord,
    FrontFacing,
    FragColor,
    FragData,
    FragDepth,
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub const_value: Option<ConstVal>,
    pub builtin: Option<BuiltinVar>,
    pub loc: Location,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamQualifier {
    In,
    Out,
    InOut,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub symbol: SymbolId,
    pub qualifier: ParamQualifier,
}

#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    pub body: Option<StmtId>,
    pub loc: Location,
}

#[derive(Default, Debug)]
pub struct Ast {
    pub exprs: Vec<Expr>,
    pub stmts: Vec<Stmt>,
    pub symbols: Vec<Symbol>,
    pub functions: Vec<FunctionDef>,
    /// File-scope declarations in order, with optional const initializers.
    pub globals: Vec<(SymbolId, Option<ExprId>)>,
    pub main: Option<usize>,
    /// `#pragma STDGL invariant(all)` was seen.
    pub invariant_all: bool,
}

impl Ast {
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn push_expr(&mut self, expr: Expr) -> ExprId {
        self.exprs.push(expr);
        ExprId(self.exprs.len() as u32 - 1)
    }

    pub fn push_stmt(&mut self, stmt: Stmt) -> StmtId {
        self.stmts.push(stmt);
        StmtId(self.stmts.len() as u32 - 1)
    }

    pub fn push_symbol(&mut self, symbol: Symbol) -> SymbolId {
        self.symbols.push(symbol);
        SymbolId(self.symbols.len() as u32 - 1)
    }
}
