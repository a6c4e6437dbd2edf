//! Hand-assembled class files and archives for tests.

use crate::classfile::{opcode, tag, ClassLayout, CodeAttribute, Depth};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

/// Builds a constant pool entry by entry
#[derive(Debug, Clone)]
pub(crate) struct PoolBuilder {
    bytes: Vec<u8>,
    next: u16,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
}

impl PoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next: 1,
            utf8: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    fn push(&mut self, entry: &[u8], slots: u16) -> u16 {
        let index = self.next;
        self.bytes.extend_from_slice(entry);
        self.next += slots;
        index
    }

    pub(crate) fn utf8(&mut self, value: &str) -> u16 {
        if let Some(&index) = self.utf8.get(value) {
            return index;
        }
        let mut entry = vec![tag::UTF8];
        entry.extend_from_slice(&(value.len() as u16).to_be_bytes());
        entry.extend_from_slice(value.as_bytes());
        let index = self.push(&entry, 1);
        self.utf8.insert(value.to_owned(), index);
        index
    }

    pub(crate) fn class(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.classes.get(name) {
            return index;
        }
        let name_index = self.utf8(name);
        let mut entry = vec![tag::CLASS];
        entry.extend_from_slice(&name_index.to_be_bytes());
        let index = self.push(&entry, 1);
        self.classes.insert(name.to_owned(), index);
        index
    }

    pub(crate) fn string(&mut self, value: &str) -> u16 {
        let utf8 = self.utf8(value);
        let mut entry = vec![tag::STRING];
        entry.extend_from_slice(&utf8.to_be_bytes());
        self.push(&entry, 1)
    }

    pub(crate) fn integer(&mut self, value: i32) -> u16 {
        let mut entry = vec![tag::INTEGER];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(&entry, 1)
    }

    pub(crate) fn long(&mut self, value: i64) -> u16 {
        let mut entry = vec![tag::LONG];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(&entry, 2)
    }

    fn member(&mut self, member_tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(owner);
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut nat = vec![tag::NAME_AND_TYPE];
        nat.extend_from_slice(&name.to_be_bytes());
        nat.extend_from_slice(&descriptor.to_be_bytes());
        let nat = self.push(&nat, 1);
        let mut entry = vec![member_tag];
        entry.extend_from_slice(&class.to_be_bytes());
        entry.extend_from_slice(&nat.to_be_bytes());
        self.push(&entry, 1)
    }

    pub(crate) fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member(tag::FIELD_REF, owner, name, descriptor)
    }

    pub(crate) fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member(tag::METHOD_REF, owner, name, descriptor)
    }

    /// Add filler entries until the next index is at least `index`
    pub(crate) fn pad_to(&mut self, index: u16) {
        let mut n = 0;
        while self.next < index {
            self.utf8(&format!("pad{}", n));
            n += 1;
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.next.to_be_bytes().to_vec();
        out.extend_from_slice(&self.bytes);
        out
    }
}

/// Tiny bytecode assembler
#[derive(Debug, Clone, Default)]
pub(crate) struct Code {
    pub(crate) bytes: Vec<u8>,
    pub(crate) exception_table: Vec<[u16; 4]>,
    /// Nested attributes as (name, payload)
    pub(crate) attributes: Vec<(String, Vec<u8>)>,
}

impl Code {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn offset(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn op(&mut self, opcode: u8) -> &mut Self {
        self.bytes.push(opcode);
        self
    }

    pub(crate) fn op_u2(&mut self, opcode: u8, operand: u16) -> &mut Self {
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&operand.to_be_bytes());
        self
    }

    pub(crate) fn ldc(&mut self, index: u16) -> &mut Self {
        if index <= 0xFF {
            self.bytes.extend_from_slice(&[opcode::LDC, index as u8]);
            self
        } else {
            self.op_u2(opcode::LDC_W, index)
        }
    }

    pub(crate) fn int(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=5 => self.op((0x03 + value) as u8),
            _ => {
                self.bytes.extend_from_slice(&[0x10, value as u8]);
                self
            }
        }
    }

    pub(crate) fn goto(&mut self, relative: i16) -> &mut Self {
        self.op_u2(opcode::GOTO, relative as u16)
    }

    pub(crate) fn attribute(&mut self, name: &str, payload: Vec<u8>) -> &mut Self {
        self.attributes.push((name.to_owned(), payload));
        self
    }
}

/// Assembles a whole class file
#[derive(Debug, Clone)]
pub(crate) struct ClassBuilder {
    pub(crate) pool: PoolBuilder,
    this_class: u16,
    super_class: u16,
    fields: Vec<u8>,
    field_count: u16,
    methods: Vec<u8>,
    method_count: u16,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str, super_name: &str) -> Self {
        let mut pool = PoolBuilder::new();
        let this_class = pool.class(name);
        let super_class = pool.class(super_name);
        Self {
            pool,
            this_class,
            super_class,
            fields: Vec::new(),
            field_count: 0,
            methods: Vec::new(),
            method_count: 0,
        }
    }

    pub(crate) fn field(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        for v in [access, name, descriptor, 0] {
            self.fields.extend_from_slice(&v.to_be_bytes());
        }
        self.field_count += 1;
        self
    }

    pub(crate) fn method(&mut self, access: u16, name: &str, descriptor: &str, code: Code) -> &mut Self {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        let code_name = self.pool.utf8("Code");

        let mut body = Vec::new();
        body.extend_from_slice(&8u16.to_be_bytes()); // max_stack
        body.extend_from_slice(&4u16.to_be_bytes()); // max_locals
        body.extend_from_slice(&(code.bytes.len() as u32).to_be_bytes());
        body.extend_from_slice(&code.bytes);
        body.extend_from_slice(&(code.exception_table.len() as u16).to_be_bytes());
        for row in &code.exception_table {
            for v in row {
                body.extend_from_slice(&v.to_be_bytes());
            }
        }
        body.extend_from_slice(&(code.attributes.len() as u16).to_be_bytes());
        for (attr_name, payload) in &code.attributes {
            let attr_name = self.pool.utf8(attr_name);
            body.extend_from_slice(&attr_name.to_be_bytes());
            body.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            body.extend_from_slice(payload);
        }

        for v in [access, name, descriptor, 1, code_name] {
            self.methods.extend_from_slice(&v.to_be_bytes());
        }
        self.methods.extend_from_slice(&(body.len() as u32).to_be_bytes());
        self.methods.extend_from_slice(&body);
        self.method_count += 1;
        self
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        out.extend_from_slice(&self.pool.to_bytes());
        for v in [0x4031, self.this_class, self.super_class, 0, self.field_count] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&self.fields);
        out.extend_from_slice(&self.method_count.to_be_bytes());
        out.extend_from_slice(&self.methods);
        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }
}

/// Literal pushed as the name argument of a construction sequence
#[derive(Debug, Clone, Copy)]
pub(crate) enum SiteLiteral<'a> {
    Str(&'a str),
    Int(i32),
}

/// One `new; dup; ldc; iconst; invokespecial; putstatic` group
#[derive(Debug, Clone, Copy)]
pub(crate) struct Site<'a> {
    pub(crate) literal: SiteLiteral<'a>,
    pub(crate) field: &'a str,
}

/// Enum class whose fields and construction sites can disagree
pub(crate) fn enum_with_sites(name: &str, fields: &[&str], sites: &[Site<'_>], pad: u16) -> Vec<u8> {
    let descriptor = format!("L{};", name);
    let array_descriptor = format!("[L{};", name);
    let mut class = ClassBuilder::new(name, "java/lang/Enum");
    for field in fields {
        class.field(0x4019, field, &descriptor);
    }
    class.field(0x101A, "$VALUES", &array_descriptor);

    let own = class.pool.class(name);
    let init = class
        .pool
        .method_ref(name, "<init>", "(Ljava/lang/String;I)V");
    let super_init = class
        .pool
        .method_ref("java/lang/Enum", "<init>", "(Ljava/lang/String;I)V");
    let values = class.pool.field_ref(name, "$VALUES", &array_descriptor);
    let field_refs: Vec<u16> = sites
        .iter()
        .map(|site| class.pool.field_ref(name, site.field, &descriptor))
        .collect();
    let literals: Vec<u16> = sites
        .iter()
        .map(|site| match site.literal {
            SiteLiteral::Str(s) => class.pool.string(s),
            SiteLiteral::Int(v) => class.pool.integer(v),
        })
        .collect();
    // Filler after the literals keeps them reachable by a narrow ldc
    class.pool.pad_to(pad);

    let mut ctor = Code::new();
    ctor.op(0x2A)
        .op(0x2B)
        .op(0x1C)
        .op_u2(opcode::INVOKESPECIAL, super_init)
        .op(opcode::RETURN);
    class.method(0x0002, "<init>", "(Ljava/lang/String;I)V", ctor);

    let mut clinit = Code::new();
    for (ordinal, (literal, field)) in literals.iter().zip(&field_refs).enumerate() {
        clinit
            .op_u2(opcode::NEW, own)
            .op(0x59)
            .ldc(*literal)
            .int(ordinal as i32)
            .op_u2(opcode::INVOKESPECIAL, init)
            .op_u2(opcode::PUTSTATIC, *field);
    }
    clinit.int(sites.len() as i32).op_u2(opcode::ANEWARRAY, own);
    for (ordinal, field) in field_refs.iter().enumerate() {
        clinit
            .op(0x59)
            .int(ordinal as i32)
            .op_u2(opcode::GETSTATIC, *field)
            .op(0x53);
    }
    clinit
        .op_u2(opcode::PUTSTATIC, values)
        .op(opcode::RETURN);
    class.method(0x0008, "<clinit>", "()V", clinit);

    class.to_bytes()
}

/// Enum class with one construction site per field, in declaration order
pub(crate) fn enum_class(name: &str, constants: &[(&str, &str)]) -> Vec<u8> {
    let fields: Vec<&str> = constants.iter().map(|(field, _)| *field).collect();
    let sites: Vec<Site<'_>> = constants
        .iter()
        .map(|(field, literal)| Site {
            literal: SiteLiteral::Str(literal),
            field,
        })
        .collect();
    enum_with_sites(name, &fields, &sites, 0)
}

/// String literal loaded first after each own-type `new` in `<clinit>`
pub(crate) fn construction_literals(bytes: &[u8]) -> Vec<String> {
    let layout = ClassLayout::parse(bytes, Depth::Full).unwrap();
    let name = layout.name().unwrap().to_owned();
    let clinit = layout.method("<clinit>", "()V").unwrap().unwrap();
    let span = layout.attribute(clinit, "Code").unwrap().unwrap();
    let code_attr = CodeAttribute::parse(bytes, span).unwrap();
    let code = &bytes[code_attr.code.clone()];

    let mut literals = Vec::new();
    let mut armed = false;
    for instruction in opcode::decode_all(code).unwrap() {
        if instruction.opcode == opcode::NEW
            && layout.pool.class_name(instruction.u2_operand(code)).unwrap() == name
        {
            armed = true;
        } else if armed {
            if let Some(index) = instruction.constant_index(code) {
                let value = layout.pool.string_value(index).unwrap().unwrap();
                literals.push(value.to_owned());
                armed = false;
            }
        }
    }
    literals
}

/// Write a zip archive with the given entries, in order
pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, zip::write::FileOptions::default())
                .unwrap();
        } else {
            zip.start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
    }
    zip.finish().unwrap();
}

/// Read every entry of a zip archive, in order
pub(crate) fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_owned(), data)
        })
        .collect()
}
