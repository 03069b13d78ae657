//! Closed type variants for every typed collection.
//!
//! The required-property lists mirror the positional arguments of the
//! corresponding OpenSees commands (see [`crate::export`]).

model_type! {
    /// Element formulations understood by the exporter
    ElementType {
        Truss => "truss" [],
        CorotTruss => "corotTruss" [],
        ElasticBeamColumn => "elasticBeamColumn" [],
        DispBeamColumn => "dispBeamColumn" [],
        ForceBeamColumn => "forceBeamColumn" [],
        ZeroLength => "zeroLength" [],
        TwoNodeLink => "twoNodeLink" [],
        Quad => "quad" [],
        Tri31 => "tri31" [],
        ShellMitc4 => "ShellMITC4" [],
        StdBrick => "stdBrick" [],
    }
}

impl ElementType {
    /// Number of nodes the element connects
    pub fn node_count(&self) -> usize {
        match self {
            ElementType::Truss
            | ElementType::CorotTruss
            | ElementType::ElasticBeamColumn
            | ElementType::DispBeamColumn
            | ElementType::ForceBeamColumn
            | ElementType::ZeroLength
            | ElementType::TwoNodeLink => 2,
            ElementType::Tri31 => 3,
            ElementType::Quad | ElementType::ShellMitc4 => 4,
            ElementType::StdBrick => 8,
        }
    }

    /// Line elements that need a geometric transformation
    pub fn is_beam_column(&self) -> bool {
        matches!(
            self,
            ElementType::ElasticBeamColumn | ElementType::DispBeamColumn | ElementType::ForceBeamColumn
        )
    }
}

model_type! {
    /// Material models
    MaterialType {
        Elastic => "Elastic" ["E"],
        ElasticPp => "ElasticPP" ["E", "epsyP"],
        /// Generic linear steel, exported as an elastic uniaxial material
        Steel => "Steel" ["E"],
        Steel01 => "Steel01" ["Fy", "E0", "b"],
        Steel02 => "Steel02" ["Fy", "E0", "b"],
        Concrete01 => "Concrete01" ["fpc", "epsc0", "fpcu", "epsU"],
        Concrete02 => "Concrete02" ["fpc", "epsc0", "fpcu", "epsU", "lambda", "ft", "Ets"],
        Hardening => "Hardening" ["E", "sigmaY", "H_iso", "H_kin"],
        ElasticIsotropic => "ElasticIsotropic" ["E", "nu"],
    }
}

impl MaterialType {
    /// Multi-dimensional (`nDMaterial`) rather than uniaxial
    pub fn is_nd(&self) -> bool {
        matches!(self, MaterialType::ElasticIsotropic)
    }
}

model_type! {
    /// Cross-section definitions
    SectionType {
        Elastic => "Elastic" ["E", "A", "Iz"],
        WideFlange => "WideFlange" ["d", "bf", "tf", "tw"],
        Rectangular => "Rectangular" ["b", "h"],
        Circular => "Circular" ["r"],
        Fiber => "Fiber" [],
        ElasticMembranePlate => "ElasticMembranePlateSection" ["E", "nu", "h"],
    }
}

model_type! {
    /// Multi-node constraints; `fix` fans out into boundary conditions
    ConstraintType {
        Fix => "fix" ["node_ids", "dofs"],
        EqualDof => "equalDOF" ["retained", "constrained", "dofs"],
        RigidDiaphragm => "rigidDiaphragm" ["perp_dir", "retained", "constrained"],
        RigidLink => "rigidLink" ["link", "retained", "constrained"],
    }
}

model_type! {
    /// Nodal or element loads
    LoadType {
        Point => "point" [],
        Element => "element" [],
    }
}

model_type! {
    /// Output recorders
    RecorderType {
        Node => "Node" [],
        Element => "Element" [],
        EnvelopeNode => "EnvelopeNode" [],
        EnvelopeElement => "EnvelopeElement" [],
        Drift => "Drift" [],
    }
}

impl RecorderType {
    /// Response recorded when the caller does not name one
    pub fn default_response(&self) -> &'static str {
        match self {
            RecorderType::Node | RecorderType::EnvelopeNode => "disp",
            RecorderType::Element | RecorderType::EnvelopeElement => "force",
            RecorderType::Drift => "drift",
        }
    }

    pub fn targets_nodes(&self) -> bool {
        matches!(self, RecorderType::Node | RecorderType::EnvelopeNode | RecorderType::Drift)
    }
}

model_type! {
    /// Geometric transformations for beam-column elements
    TransformationType {
        Linear => "Linear" [],
        PDelta => "PDelta" [],
        Corotational => "Corotational" [],
    }
}

model_type! {
    /// Time series driving load patterns
    TimeSeriesType {
        Constant => "Constant" [],
        Linear => "Linear" [],
        Path => "Path" ["dt", "values"],
        Trig => "Trig" ["tStart", "tEnd", "period"],
    }
}

model_type! {
    /// Load patterns
    PatternType {
        Plain => "Plain" [],
        UniformExcitation => "UniformExcitation" ["direction"],
    }
}
